use serde::{Deserialize, Serialize};

// Ids are opaque strings issued by the backend; the core never inspects them.
macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ConversationId);
id_newtype!(ProjectId);
id_newtype!(TaskId);

/// Channel tag on an inbound notification frame. The set is open; anything
/// the core does not route specially collapses to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum NotificationChannel {
    Chat,
    Task,
    Payslip,
    Project,
    Other,
}

impl From<String> for NotificationChannel {
    fn from(raw: String) -> Self {
        // The server is not consistent about casing here.
        match raw.to_ascii_lowercase().as_str() {
            "chat" => Self::Chat,
            "task" => Self::Task,
            "payslip" => Self::Payslip,
            "project" => Self::Project,
            _ => Self::Other,
        }
    }
}
