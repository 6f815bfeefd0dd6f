use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    admin_users: HashSet<i64>,
    admin_chats: HashSet<i64>,
}

impl AccessPolicy {
    pub fn new(
        admin_users: impl IntoIterator<Item = i64>,
        admin_chats: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            admin_users: admin_users.into_iter().collect(),
            admin_chats: admin_chats.into_iter().collect(),
        }
    }

    pub fn from_env() -> Self {
        let users = std::env::var("ADMIN_IDS").unwrap_or_default();
        let chats = std::env::var("ADMIN_GROUP_IDS").unwrap_or_default();
        Self {
            admin_users: parse_id_list(&users),
            admin_chats: parse_id_list(&chats),
        }
    }

    pub fn is_admin(&self, user: i64) -> bool {
        self.admin_users.contains(&user)
    }

    pub fn is_admin_chat(&self, chat: i64) -> bool {
        self.admin_chats.contains(&chat)
    }

    pub fn may_ingest(&self, user: i64, chat: i64) -> bool {
        self.is_admin(user) && self.is_admin_chat(chat)
    }
}

pub fn parse_id_list(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect()
}
