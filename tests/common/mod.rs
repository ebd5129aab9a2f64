#![allow(dead_code)]

use casting_engine::casting::{
    CategoryId, FactionId, MirrorGroupId, Player, PlayerId, PreferenceSubmission, Role, RoleId, TicketTier,
};

pub fn player(id: &str) -> Player {
    Player {
        id: PlayerId::from(id),
        name: String::new(),
        ticket_tier: TicketTier::from("player"),
        is_member: true,
        factions: Default::default(),
    }
}

pub fn player_in(id: &str, factions: &[&str]) -> Player {
    Player {
        factions: factions.iter().map(|f| FactionId::from(*f)).collect(),
        ..player(id)
    }
}

pub fn role(id: &str) -> Role {
    Role {
        id: RoleId::from(id),
        name: String::new(),
        category: CategoryId::from("main"),
        mirror_group: None,
        capacity: 1,
        faction: None,
    }
}

pub fn mirrored(id: &str, group: &str) -> Role {
    Role {
        mirror_group: Some(MirrorGroupId::from(group)),
        ..role(id)
    }
}

pub fn wants(player: &str, roles: &[&str]) -> PreferenceSubmission {
    PreferenceSubmission {
        player: PlayerId::from(player),
        category: CategoryId::from("main"),
        preferences: roles.iter().map(|r| RoleId::from(*r)).collect(),
        avoid: Vec::new(),
    }
}

pub fn pid(id: &str) -> PlayerId {
    PlayerId::from(id)
}

pub fn rid(id: &str) -> RoleId {
    RoleId::from(id)
}
