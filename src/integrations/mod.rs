//! 外部集成：Slack（需 feature `slack` 与公网 Webhook 地址）

pub mod slack;
