use std::fmt;

/// Why an outbound send was abandoned, stored verbatim in `error_message`
/// columns and in refund descriptions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailReason {
    /// The contact row is gone or soft-deleted.
    ContactMissing,
    /// The contact has opted out of messaging.
    ContactOptedOut,
    /// The contact is blocked by the user.
    ContactBlocked,
    /// The user's messaging status is not active.
    UserSuspended,
    /// No active provisioned number could be resolved for the user.
    NoSenderNumber,
    /// The user's credit balance cannot cover the send.
    InsufficientCredits,
    /// The gateway rejected the send.
    Gateway {
        /// Provider error code, when reported.
        code: Option<String>,
        /// Provider error description.
        message: String,
    },
    /// The handler itself failed mid-send (storage errors and the like).
    Internal(String),
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContactMissing => write!(f, "Contact not found"),
            Self::ContactOptedOut => write!(f, "Contact opted out"),
            Self::ContactBlocked => write!(f, "Contact blocked"),
            Self::UserSuspended => write!(f, "User messaging disabled"),
            Self::NoSenderNumber => write!(f, "No active sender number"),
            Self::InsufficientCredits => write!(f, "Insufficient credits"),
            Self::Gateway { code: Some(code), message } => {
                write!(f, "Gateway error {code}: {message}")
            }
            Self::Gateway { code: None, message } => write!(f, "Gateway error: {message}"),
            Self::Internal(message) => write!(f, "Internal error: {message}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reasons_render_operator_readable_strings() {
        assert_eq!(FailReason::InsufficientCredits.to_string(), "Insufficient credits");
        assert_eq!(
            FailReason::Gateway {
                code: Some("21610".into()),
                message: "Unsubscribed recipient".into()
            }
            .to_string(),
            "Gateway error 21610: Unsubscribed recipient"
        );
    }
}
