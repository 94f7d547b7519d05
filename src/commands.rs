//! Client-to-server command records.
//!
//! Each command is addressed to a specific room and carries the
//! originating player id. The room validates every command against its
//! authoritative state; invalid reports are dropped or answered with a
//! rejection reason, never trusted.

use serde::{Deserialize, Serialize};

/// One frame of movement/aim input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    pub seq: u32,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub sprint: bool,
    pub aim_angle: f32,
    pub mouse_down: bool,
    pub weapon_index: usize,
    pub secondary_requested: bool,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionKind {
    Normal,
    Heretic,
}

/// Ability kinds a player may place into the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AbilityKind {
    SandbagWall,
    WireCoil,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientCommand {
    Join { player_id: String, name: String },
    Leave { player_id: String },
    Input { player_id: String, frame: InputFrame },
    StartReadyTimer { player_id: String, level_type: crate::config::LevelType },
    CancelReadyTimer { player_id: String },
    OpenChest { player_id: String, chest_id: String },
    CancelOpenChest { player_id: String },
    PickUpArtifact { player_id: String, chest_id: String },
    DropArtifact { player_id: String },
    PurchaseShopItem { player_id: String, item_index: usize },
    RequestExtraction { player_id: String, kind: ExtractionKind },
    /// Leave the accomplishment screen after a finished mission.
    ReturnToLobby { player_id: String },
    PlaceAbility {
        player_id: String,
        kind: AbilityKind,
        x: f32,
        y: f32,
        angle: f32,
        progression: u8,
    },
    SendNpcDot {
        player_id: String,
        npc_server_id: String,
        dps: f32,
        duration: f32,
    },
    AbilityDotDamage {
        player_id: String,
        ability_id: String,
        target_player_id: String,
        dps: f32,
        duration: f32,
    },
}

impl ClientCommand {
    /// The player a command originates from.
    pub fn player_id(&self) -> &str {
        match self {
            ClientCommand::Join { player_id, .. }
            | ClientCommand::Leave { player_id }
            | ClientCommand::Input { player_id, .. }
            | ClientCommand::StartReadyTimer { player_id, .. }
            | ClientCommand::CancelReadyTimer { player_id }
            | ClientCommand::OpenChest { player_id, .. }
            | ClientCommand::CancelOpenChest { player_id }
            | ClientCommand::PickUpArtifact { player_id, .. }
            | ClientCommand::DropArtifact { player_id }
            | ClientCommand::PurchaseShopItem { player_id, .. }
            | ClientCommand::RequestExtraction { player_id, .. }
            | ClientCommand::ReturnToLobby { player_id }
            | ClientCommand::PlaceAbility { player_id, .. }
            | ClientCommand::SendNpcDot { player_id, .. }
            | ClientCommand::AbilityDotDamage { player_id, .. } => player_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_command_roundtrip() {
        let cmd = ClientCommand::Input {
            player_id: "p1".into(),
            frame: InputFrame {
                seq: 17,
                up: true,
                sprint: true,
                aim_angle: 1.2,
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: ClientCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
        assert_eq!(back.player_id(), "p1");
    }

    #[test]
    fn test_extraction_kind_wire_names() {
        let json = serde_json::to_string(&ExtractionKind::Heretic).unwrap();
        assert_eq!(json, "\"heretic\"");
    }
}
