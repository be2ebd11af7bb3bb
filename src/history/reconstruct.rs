//! HistoryReconstructor
//!
//! 只保留两类消息：
//! - 提及 Bot 的用户消息 -> role=user，去掉提及标记并把连续空白压成单个空格
//! - Bot 自己发出的消息 -> role=assistant，内容原样保留
//!
//! 其它消息（反应、频道闲聊、缺字段的消息）一律丢弃，不报错。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::memory::Message;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// 平台原始消息（字段可缺失，对应不完整的平台载荷）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// 发送者标识（平台用户 ID）
    pub author: Option<String>,
    pub text: Option<String>,
    /// 是否由 Bot 自身发出（由传输层判定）
    #[serde(default)]
    pub bot_authored: bool,
}

impl RawMessage {
    pub fn from_user(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            text: Some(text.into()),
            bot_authored: false,
        }
    }

    pub fn from_bot(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            text: Some(text.into()),
            bot_authored: true,
        }
    }
}

/// Bot 身份：平台用户 ID 与对应的提及标记 `<@ID>`（Slack 也可能带显示名 `<@ID|name>`）
#[derive(Debug, Clone)]
pub struct BotIdentity {
    user_id: String,
    mention_re: Option<Regex>,
}

impl BotIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into().trim().to_string();
        let mention_re = if user_id.is_empty() {
            None
        } else {
            Regex::new(&format!(r"<@{}(?:\|[^>]*)?>", regex::escape(&user_id))).ok()
        };
        Self { user_id, mention_re }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn mention_token(&self) -> String {
        format!("<@{}>", self.user_id)
    }

    /// 文本中是否含有对 Bot 的提及
    pub fn is_addressed(&self, text: &str) -> bool {
        self.mention_re.as_ref().is_some_and(|re| re.is_match(text))
    }

    fn remove_mentions(&self, text: &str) -> String {
        match &self.mention_re {
            Some(re) => re.replace_all(text, "").into_owned(),
            None => text.to_string(),
        }
    }
}

/// Turn 角色：重建后的历史只有 user / assistant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// 一条带角色的历史消息；创建后不再修改
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::User => Message::user(self.content.clone()),
            TurnRole::Assistant => Message::assistant(self.content.clone()),
        }
    }
}

/// 去掉 Bot 提及标记并压缩空白；identity 为 None 时只压缩空白
pub fn strip_mention(text: &str, identity: Option<&BotIdentity>) -> String {
    let without = match identity {
        Some(id) => id.remove_mentions(text),
        None => text.to_string(),
    };
    whitespace_re().replace_all(&without, " ").trim().to_string()
}

/// 从原始记录重建 Turn 序列；输出长度不超过输入长度，保持原有顺序
pub fn reconstruct(raw: &[RawMessage], identity: &BotIdentity) -> Vec<Turn> {
    raw.iter()
        .filter_map(|msg| classify(msg, identity))
        .collect()
}

fn classify(msg: &RawMessage, identity: &BotIdentity) -> Option<Turn> {
    let text = msg.text.as_deref()?;
    if msg.bot_authored {
        if text.trim().is_empty() {
            return None;
        }
        return Some(Turn {
            role: TurnRole::Assistant,
            content: text.to_string(),
        });
    }
    msg.author.as_deref().filter(|a| !a.is_empty())?;
    if !identity.is_addressed(text) {
        return None;
    }
    let content = strip_mention(text, Some(identity));
    if content.is_empty() {
        return None;
    }
    Some(Turn {
        role: TurnRole::User,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot() -> BotIdentity {
        BotIdentity::new("UBOT")
    }

    #[test]
    fn test_strip_mention_collapses_whitespace() {
        let id = bot();
        assert_eq!(
            strip_mention("<@UBOT>   hello \n\t world ", Some(&id)),
            "hello world"
        );
        assert_eq!(strip_mention("<@UBOT|threadbee> hi", Some(&id)), "hi");
        assert_eq!(strip_mention("<@UOTHER> hi", Some(&id)), "<@UOTHER> hi");
        assert_eq!(strip_mention("  a  b ", None), "a b");
    }

    #[test]
    fn test_strip_is_idempotent() {
        let id = bot();
        let once = strip_mention(" <@UBOT>  what   is  rust ", Some(&id));
        assert_eq!(strip_mention(&once, Some(&id)), once);
        assert_eq!(strip_mention(" ", Some(&id)), "");
        assert_eq!(strip_mention("<@UBOT>", Some(&id)), "");
    }

    #[test]
    fn test_reconstruct_keeps_only_two_predicates() {
        let raw = vec![
            RawMessage::from_user("U1", "<@UBOT> what is the leave policy?"),
            RawMessage::from_bot("UBOT", "Employees get **20** days."),
            RawMessage::from_user("U2", "unrelated chatter"),
            RawMessage::from_user("U1", "<@UBOT>   and  sick leave?"),
        ];
        let turns = reconstruct(&raw, &bot());
        assert_eq!(
            turns,
            vec![
                Turn { role: TurnRole::User, content: "what is the leave policy?".into() },
                Turn { role: TurnRole::Assistant, content: "Employees get **20** days.".into() },
                Turn { role: TurnRole::User, content: "and sick leave?".into() },
            ]
        );
    }

    #[test]
    fn test_reconstruct_tolerates_malformed() {
        let raw = vec![
            RawMessage::default(),
            RawMessage { author: None, text: Some("<@UBOT> hi".into()), bot_authored: false },
            RawMessage { author: Some("U1".into()), text: None, bot_authored: false },
            RawMessage::from_user("U1", "<@UBOT>"),
            RawMessage::from_bot("UBOT", "   "),
        ];
        let turns = reconstruct(&raw, &bot());
        assert!(turns.is_empty());
        assert!(reconstruct(&[], &bot()).is_empty());
    }

    #[test]
    fn test_bot_message_with_own_mention_is_assistant() {
        let raw = vec![RawMessage::from_bot("UBOT", "ping <@UBOT>  verbatim")];
        let turns = reconstruct(&raw, &bot());
        assert_eq!(turns[0].role, TurnRole::Assistant);
        assert_eq!(turns[0].content, "ping <@UBOT>  verbatim");
    }

    #[test]
    fn test_empty_identity_addresses_nothing() {
        let id = BotIdentity::new("");
        assert!(!id.is_addressed("<@> hi"));
        let raw = vec![RawMessage::from_user("U1", "<@UBOT> hi")];
        assert!(reconstruct(&raw, &id).is_empty());
    }

    #[test]
    fn test_output_never_longer_than_input() {
        let id = bot();
        let texts = ["", " ", "<@UBOT>", "<@UBOT> x", "y", "<@UBOTX> z"];
        let mut raw = Vec::new();
        for (i, t) in texts.iter().enumerate() {
            raw.push(RawMessage {
                author: Some(format!("U{}", i)),
                text: Some(t.to_string()),
                bot_authored: i % 2 == 0,
            });
            raw.push(RawMessage::from_user("U9", *t));
        }
        let turns = reconstruct(&raw, &id);
        assert!(turns.len() <= raw.len());
        for t in &turns {
            assert!(!t.content.trim().is_empty());
        }
    }
}
