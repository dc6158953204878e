use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// WebSocket close code sent when the identity check fails.
pub const AUTH_FAILED_CLOSE_CODE: u16 = 4001;

/// The user a connection acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: u64,
    pub username: String,
}

/// Resolves the token presented on connect to a principal.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, token: &str) -> Option<Principal>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserToken {
    pub token: String,
    pub user_id: u64,
    pub username: String,
}

/// Static token table loaded from the `[[auth.users]]` config entries.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, Principal>,
}

impl TokenTable {
    pub fn new(users: &[UserToken]) -> Self {
        let tokens = users
            .iter()
            .map(|u| {
                let principal = Principal {
                    user_id: u.user_id,
                    username: u.username.clone(),
                };
                (u.token.clone(), principal)
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, token: &str) -> Option<Principal> {
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).cloned()
    }
}

/// Pulls `token` out of a request query string such as `a=1&token=abc`.
pub fn token_from_query(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value)
}
