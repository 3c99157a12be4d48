use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which alert body the mail relay should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateId {
    Down,
    Up,
}

impl TemplateId {
    pub fn subject(self) -> &'static str {
        match self {
            TemplateId::Down => "Uptime Alert - Website Down",
            TemplateId::Up => "Uptime Alert - Website Up",
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateId::Down => write!(f, "down"),
            TemplateId::Up => write!(f, "up"),
        }
    }
}

/// An alert addressed to one recipient.
///
/// `data` is ordered so that equal payloads serialize to identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub to: String,
    pub subject: String,
    pub template: TemplateId,
    pub data: BTreeMap<String, String>,
}
