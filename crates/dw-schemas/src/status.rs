use serde::{Deserialize, Serialize};

/// Lifecycle status of a command.
///
/// The transition table lives in [`CommandStatus::can_transition`]; the store
/// refuses any edge not listed there. Terminal statuses have no outgoing
/// edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Invalid,
    PendingApproval,
    RejectedPolicy,
    Rejected,
    Approved,
    Executing,
    Executed,
    Failed,
}

impl CommandStatus {
    pub const ALL: [CommandStatus; 8] = [
        CommandStatus::Invalid,
        CommandStatus::PendingApproval,
        CommandStatus::RejectedPolicy,
        CommandStatus::Rejected,
        CommandStatus::Approved,
        CommandStatus::Executing,
        CommandStatus::Executed,
        CommandStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Invalid => "INVALID",
            CommandStatus::PendingApproval => "PENDING_APPROVAL",
            CommandStatus::RejectedPolicy => "REJECTED_POLICY",
            CommandStatus::Rejected => "REJECTED",
            CommandStatus::Approved => "APPROVED",
            CommandStatus::Executing => "EXECUTING",
            CommandStatus::Executed => "EXECUTED",
            CommandStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INVALID" => Some(CommandStatus::Invalid),
            "PENDING_APPROVAL" => Some(CommandStatus::PendingApproval),
            "REJECTED_POLICY" => Some(CommandStatus::RejectedPolicy),
            "REJECTED" => Some(CommandStatus::Rejected),
            "APPROVED" => Some(CommandStatus::Approved),
            "EXECUTING" => Some(CommandStatus::Executing),
            "EXECUTED" => Some(CommandStatus::Executed),
            "FAILED" => Some(CommandStatus::Failed),
            _ => None,
        }
    }

    /// REJECTED, REJECTED_POLICY, EXECUTED and FAILED have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Rejected
                | CommandStatus::RejectedPolicy
                | CommandStatus::Executed
                | CommandStatus::Failed
        )
    }

    /// Allowed edges of the command state graph.
    pub fn can_transition(&self, to: CommandStatus) -> bool {
        use CommandStatus::*;
        matches!(
            (self, to),
            (Invalid, PendingApproval)
                | (Invalid, Rejected)
                | (Invalid, RejectedPolicy)
                | (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (PendingApproval, RejectedPolicy)
                | (Approved, Executing)
                | (Approved, Rejected)
                | (Executing, Executed)
                | (Executing, Failed)
        )
    }
}

/// A signer's verdict on a pending command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "APPROVE",
            Decision::Reject => "REJECT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPROVE" => Some(Decision::Approve),
            "REJECT" => Some(Decision::Reject),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for from in CommandStatus::ALL {
            if from.is_terminal() {
                for to in CommandStatus::ALL {
                    assert!(
                        !from.can_transition(to),
                        "{} -> {} must be refused",
                        from.as_str(),
                        to.as_str()
                    );
                }
            }
        }
    }

    #[test]
    fn no_self_edges() {
        for s in CommandStatus::ALL {
            assert!(!s.can_transition(s));
        }
    }

    #[test]
    fn roundtrip_as_str_parse() {
        for s in CommandStatus::ALL {
            assert_eq!(CommandStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(CommandStatus::parse("BOGUS"), None);
    }

    #[test]
    fn executing_reaches_only_terminal_states() {
        for to in CommandStatus::ALL {
            if CommandStatus::Executing.can_transition(to) {
                assert!(to.is_terminal());
            }
        }
    }
}
