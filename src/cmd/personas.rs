//! Panel listing (`pitch-panel personas`).

use anyhow::Result;
use console::style;
use pitch_panel::panel::PersonaKind;
use std::path::Path;

use super::super::Cli;

pub fn cmd_personas(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;
    let personas = config.toml.panel.resolve_personas()?;

    println!();
    println!("{}", style("Configured panel").bold());
    println!();
    for (i, persona) in personas.iter().enumerate() {
        println!(
            "  {}. {} ({})",
            i + 1,
            style(persona.display_name()).bold(),
            persona.id()
        );
        println!("     focus: {}", persona.focus_phrase());
    }
    println!();
    println!("Schedule: {}", config.toml.panel.schedule);

    let unused: Vec<String> = PersonaKind::all_builtins()
        .into_iter()
        .map(|k| k.id())
        .filter(|id| !personas.iter().any(|p| &p.id() == id))
        .collect();
    if !unused.is_empty() {
        println!("Also available: {}", unused.join(", "));
    }
    println!();
    Ok(())
}
