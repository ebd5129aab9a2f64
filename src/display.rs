use std::fs::File;
use std::io::Write;

use crate::casting::constraints::Legality;
use crate::casting::simulation::SimulationResult;
use crate::casting::stats::PreferenceStats;
use crate::casting::types::{PlayerId, RoleCatalog, RoleId, Roster};

/// Formats a player as `Name (id)`, or just the id when no name is known
pub fn format_player_name(roster: &Roster, player: &PlayerId) -> String {
    match roster.get(player) {
        Some(p) if !p.name.is_empty() => format!("{} ({})", p.display_name(), player),
        _ => player.to_string(),
    }
}

fn format_role_name(catalog: &RoleCatalog, role: &RoleId) -> String {
    match catalog.get(role) {
        Some(r) if !r.name.is_empty() => format!("{} [{}]", r.name, role),
        _ => role.to_string(),
    }
}

fn describe_legality(legality: &Legality) -> String {
    match legality {
        Legality::Legal => "legal".to_string(),
        Legality::Ineligible => "ineligible".to_string(),
        Legality::InvalidPreference => "not in this round".to_string(),
        Legality::MirrorBlocked { group, by } => format!("mirror group {} taken by {}", group, by),
        Legality::FactionMismatch { required } => format!("requires faction {}", required),
        Legality::LockedOut => "locked out".to_string(),
        Legality::LockedElsewhere { role } => format!("locked to {}", role),
        Legality::AlreadyAssigned => "already assigned".to_string(),
        Legality::Avoided => "avoided".to_string(),
    }
}

/// Renders the result as plain text lines: one line per role of the round,
/// then the people and problems staff should look at.
pub fn render_simulation(result: &SimulationResult, roster: &Roster, catalog: &RoleCatalog) -> Vec<String> {
    let mut lines = vec![format!("** {} (revision {}) **", result.round, result.revision)];

    if !result.conflicts.is_empty() {
        lines.push(format!("LOCK CONFLICTS ({}):", result.conflicts.len()));
        for conflict in &result.conflicts {
            lines.push(format!("  - {}", conflict));
        }
        return lines;
    }

    for role in catalog.in_category(&result.round.category) {
        let seated: Vec<_> = result.filled_roles.iter().filter(|f| f.role == role.id).collect();
        let name = format_role_name(catalog, &role.id);
        if seated.is_empty() {
            lines.push(format!("{} -> [EMPTY]", name));
        }
        for filled in seated {
            let rank = match filled.rank {
                Some(rank) => format!("rank {}", rank),
                None => "unlisted".to_string(),
            };
            let forced = if filled.forced { ", locked" } else { "" };
            lines.push(format!(
                "{} -> {} ({}{})",
                name,
                format_player_name(roster, &filled.player),
                rank,
                forced
            ));
        }
    }

    let sections: [(&str, &[PlayerId]); 3] = [
        ("Unmatched players", &result.unsatisfied_players),
        ("Players without preferences", &result.no_preferences),
        ("Ineligible players", &result.ineligible_players),
    ];
    for (title, players) in sections {
        if players.is_empty() {
            continue;
        }
        lines.push(format!("{} ({}):", title, players.len()));
        for player in players {
            lines.push(format!("  - {}", format_player_name(roster, player)));
        }
    }

    if !result.avoidance_flags.is_empty() {
        lines.push(format!("Avoidance flags ({}):", result.avoidance_flags.len()));
        for flag in &result.avoidance_flags {
            let note = flag.note.as_deref().map(|n| format!(": {}", n)).unwrap_or_default();
            lines.push(format!(
                "  - {} cast as {}{}",
                format_player_name(roster, &flag.player),
                flag.role,
                note
            ));
        }
    }

    if !result.excluded_edges.is_empty() {
        lines.push(format!("Excluded preferences ({}):", result.excluded_edges.len()));
        for edge in &result.excluded_edges {
            lines.push(format!(
                "  - {} #{} {}: {}",
                edge.player,
                edge.rank,
                edge.role,
                describe_legality(&edge.legality)
            ));
        }
    }

    lines
}

/// Prints a simulation result in a readable format
pub fn print_simulation(result: &SimulationResult, roster: &Roster, catalog: &RoleCatalog) {
    println!();
    for line in render_simulation(result, roster, catalog) {
        println!("{}", line);
    }
    if let Some(assignment) = &result.assignment {
        println!(
            "\nSeated: {}, first choice: {}, total weight: {}",
            result.filled_roles.len(),
            result.first_choice_count(),
            assignment.total_weight
        );
    }
}

/// Writes a simulation result to a text file
pub fn write_simulation_to_file(
    result: &SimulationResult,
    roster: &Roster,
    catalog: &RoleCatalog,
    filename: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::create(filename)?;
    for line in render_simulation(result, roster, catalog) {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// Prints role popularity, most requested first
pub fn print_stats(stats: &PreferenceStats) {
    println!("\n=== Preference statistics for {} ===", stats.round);
    println!("Players with preferences: {}", stats.players_with_preferences);
    for role in stats.popularity() {
        let ranks = role
            .by_rank
            .iter()
            .map(|(rank, count)| format!("#{}: {}", rank, count))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {} -> {} mention(s), {} first choice, {} avoid  [{}]",
            role.role, role.total, role.first_choice, role.avoided, ranks
        );
    }
}
