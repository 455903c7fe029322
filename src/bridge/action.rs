use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Intent carried by an inline keyboard button, encoded as
/// `keyword[:conversation[:account]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionToken {
    /// Bare `resolve` from older messages; the conversation comes from the
    /// message mapping of the pressed message.
    LegacyResolve,
    Resolve {
        conversation_id: i64,
        account_id: Option<i64>,
    },
    Reopen {
        conversation_id: i64,
        account_id: Option<i64>,
    },
    Close {
        conversation_id: i64,
        account_id: Option<i64>,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized action token: {0}")]
pub struct InvalidActionToken(String);

impl FromStr for ActionToken {
    type Err = InvalidActionToken;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidActionToken(raw.to_string());
        let mut parts = raw.trim().split(':');
        let keyword = parts.next().unwrap_or_default();
        let ids = parts
            .map(|part| part.parse::<i64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let (conversation_id, account_id) = match ids.as_slice() {
            [] if keyword == "resolve" => return Ok(ActionToken::LegacyResolve),
            [conversation] => (*conversation, None),
            [conversation, account] => (*conversation, Some(*account)),
            _ => return Err(invalid()),
        };

        match keyword {
            "resolve" => Ok(ActionToken::Resolve {
                conversation_id,
                account_id,
            }),
            "reopen" => Ok(ActionToken::Reopen {
                conversation_id,
                account_id,
            }),
            "close" => Ok(ActionToken::Close {
                conversation_id,
                account_id,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (keyword, conversation_id, account_id) = match *self {
            ActionToken::LegacyResolve => return f.write_str("resolve"),
            ActionToken::Resolve {
                conversation_id,
                account_id,
            } => ("resolve", conversation_id, account_id),
            ActionToken::Reopen {
                conversation_id,
                account_id,
            } => ("reopen", conversation_id, account_id),
            ActionToken::Close {
                conversation_id,
                account_id,
            } => ("close", conversation_id, account_id),
        };

        write!(f, "{keyword}:{conversation_id}")?;
        if let Some(account_id) = account_id {
            write!(f, ":{account_id}")?;
        }
        Ok(())
    }
}
