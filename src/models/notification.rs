use serde::{Deserialize, Serialize};

use crate::models::Record;

/// Wire shape of a follow notification published on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowNotification {
    pub payload: FollowNotificationPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowNotificationPayload {
    pub title: String,
    pub body: String,
    /// Follower id.
    pub created_by: String,
    /// Followed id.
    pub target_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl FollowNotification {
    /// Build the notification text. A missing follower record degrades to the raw id.
    pub fn compose(
        follower_id: &str,
        target_id: &str,
        follower: Option<&Record>,
        profile_path_prefix: &str,
    ) -> Self {
        let (display_name, action) = match follower {
            Some(record) => {
                let mut name = capitalize(&record.firstname);
                if let Some(lastname) = record.lastname.as_deref().filter(|l| !l.is_empty()) {
                    name.push(' ');
                    name.push_str(&capitalize(lastname));
                }
                let prefix = profile_path_prefix.trim_end_matches('/');
                (name, Some(format!("{}/{}", prefix, record.username)))
            }
            None => (follower_id.to_string(), None),
        };

        // English text and a configurable profile prefix replace the earlier
        // French copy ("nouveau abonnée", "vous a abonné") and its fixed
        // `/klader/{username}` link. The change is deliberate.
        Self {
            payload: FollowNotificationPayload {
                title: "New follower".to_string(),
                body: format!("{} started following you", display_name),
                created_by: follower_id.to_string(),
                target_user_id: target_id.to_string(),
                action,
            },
        }
    }
}

/// Upper-case the first character, lower-case the rest.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
