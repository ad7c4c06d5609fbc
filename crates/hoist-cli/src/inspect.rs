//! Interactive inspect pause for the deployment pipeline.
//!
//! Uses dialoguer for the terminal prompt; shown between packaging and
//! upload when `--inspect` is passed.

use std::path::Path;

use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};

use hoist_core::error::{HoistError, HoistResult};
use hoist_core::pipeline::InspectGate;

/// Gate that blocks on a terminal confirmation.
#[derive(Debug, Default)]
pub struct TerminalInspectGate;

impl InspectGate for TerminalInspectGate {
    fn pause(&self, archive: &Path) -> HoistResult<bool> {
        println!(
            "{} {}",
            style("Deployment archive ready:").bold(),
            archive.display()
        );
        println!("Inspect the archive now; nothing has been uploaded yet.");

        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Continue with the upload?")
            .default(true)
            .interact()
            .map_err(|e| {
                HoistError::internal("Could not read the inspect confirmation")
                    .with_source(anyhow::Error::new(e))
            })
    }
}
