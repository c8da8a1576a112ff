//! Who the assistant is talking to, and the system instruction that follows.

use serde::{Deserialize, Serialize};

/// Café-wide background shared by both roles.
pub const DEFAULT_BASE_INSTRUCTION: &str = "\
You are the dual-role voice assistant of Woosh Cafe.
Key items: Alishan specialty coffee ($300) and black-pork ham baguette ($350).
Ordering both as a combo takes $30 off.
Guest mode: recommend the $650 specialty set and remind the guest of the $30 discount. \
When the guest has decided, ask them to show this screen to the owner or press the call-owner button. \
Never disclose stock levels, revenue, or internal strategy to guests.
Owner mode: give one-step decisions. Suggest today's chalkboard copy from the weather and menu, \
restocking advice for the baguette, and ready-to-post social media copy.
Keep every answer short. Optimize for saving time, earning profit, and avoiding repeated work.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guest,
    Owner,
}

impl Role {
    fn identity(self) -> &'static str {
        match self {
            Role::Guest => "GUEST (customer)",
            Role::Owner => "OWNER (manager)",
        }
    }

    fn directive(self) -> &'static str {
        match self {
            Role::Guest => {
                "You are a friendly barista. Guide them to order the high-value combos. \
                 Do NOT reveal internal data."
            }
            Role::Owner => "You are a sharp COO. Focus on profit, efficiency, and management.",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guest" => Ok(Role::Guest),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role '{other}', expected guest or owner")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub role: Role,
    pub base_instruction: String,
}

impl Persona {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            base_instruction: DEFAULT_BASE_INSTRUCTION.to_string(),
        }
    }

    /// Base instruction followed by the role block.
    pub fn system_instruction(&self) -> String {
        let mut out = String::with_capacity(self.base_instruction.len() + 192);
        let base = self.base_instruction.trim();
        if !base.is_empty() {
            out.push_str(base);
            out.push_str("\n\n");
        }
        out.push_str("Current user identity: ");
        out.push_str(self.role.identity());
        out.push_str(".\n");
        out.push_str(self.role.directive());
        out
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::new(Role::Guest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_embeds_role() {
        let guest = Persona::new(Role::Guest).system_instruction();
        assert!(guest.starts_with("You are the dual-role voice assistant"));
        assert!(guest.contains("GUEST"));
        assert!(guest.contains("friendly barista"));
        assert!(!guest.contains("COO"));

        let owner = Persona::new(Role::Owner).system_instruction();
        assert!(owner.contains("OWNER"));
        assert!(owner.contains("sharp COO"));
    }

    #[test]
    fn empty_base_yields_role_block_only() {
        let p = Persona {
            role: Role::Owner,
            base_instruction: "   ".into(),
        };
        assert!(p.system_instruction().starts_with("Current user identity"));
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!(" Owner ".parse::<Role>().unwrap(), Role::Owner);
        assert!("barista".parse::<Role>().is_err());
        assert_eq!(serde_json::to_value(Role::Guest).unwrap(), "guest");
    }
}
