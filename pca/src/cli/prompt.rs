// pca/src/cli/prompt.rs
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, MultiSelect, Select};
use pca_common::error::{PcaError, Result};
use tracing::debug;

use super::CommandContext;

fn prompt_error(e: dialoguer::Error) -> PcaError {
    PcaError::Generic(format!("prompt failed: {e}"))
}

/// Yes with `--force`, no when nobody can answer.
pub fn confirm(ctx: &CommandContext<'_>, question: &str) -> Result<bool> {
    if ctx.force {
        debug!("Confirmed by --force: {}", question);
        return Ok(true);
    }
    if !ctx.interactive {
        return Ok(false);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(question)
        .default(false)
        .interact()
        .map_err(prompt_error)
}

/// Picks one of `items`: the one whose id is `wanted`, the only one, or the
/// one chosen at the prompt.
pub fn choose<T>(
    ctx: &CommandContext<'_>,
    what: &str,
    items: Vec<T>,
    wanted: Option<i64>,
    id: impl Fn(&T) -> i64,
    label: impl Fn(&T) -> String,
) -> Result<T> {
    if items.is_empty() {
        return Err(PcaError::NotFound(format!("no {what} available")));
    }
    if let Some(wanted) = wanted {
        return items
            .into_iter()
            .find(|item| id(item) == wanted)
            .ok_or_else(|| PcaError::NotFound(format!("{what} {wanted}")));
    }
    if items.len() == 1 {
        debug!("Only one {} available, selecting it", what);
        return items
            .into_iter()
            .next()
            .ok_or_else(|| PcaError::NotFound(format!("no {what} available")));
    }
    if !ctx.interactive {
        return Err(PcaError::Generic(format!("{what} must be given explicitly")));
    }

    let labels: Vec<String> = items
        .iter()
        .map(|item| format!("{} ({})", label(item), id(item)))
        .collect();
    let picked = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Select {what}"))
        .items(&labels)
        .default(0)
        .interact()
        .map_err(prompt_error)?;
    items
        .into_iter()
        .nth(picked)
        .ok_or_else(|| PcaError::NotFound(format!("{what} #{picked}")))
}

pub fn choose_many(what: &str, labels: &[String]) -> Result<Vec<usize>> {
    MultiSelect::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Select {what} (space to toggle)"))
        .items(labels)
        .interact()
        .map_err(prompt_error)
}
