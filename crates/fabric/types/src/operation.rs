use serde::{Deserialize, Serialize};

/// Fabric operations, as named in logs and recovery reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Register,
    Amplify,
    Broadcast,
    Synchronize,
    Recover,
    Forget,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Register => "register",
            Operation::Amplify => "amplify",
            Operation::Broadcast => "broadcast",
            Operation::Synchronize => "synchronize",
            Operation::Recover => "recover",
            Operation::Forget => "forget",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
