use anyhow::Result;

use crate::config::Config;
use crate::models::Field;

/// `shelf fields`: list every refreshable field and its configured policy.
pub fn list_fields(config: &Config) -> Result<()> {
    let usages = config.field_usages()?;

    println!("{:<16} {:<14} SELECTED", "FIELD", "MODE");
    for field in Field::all() {
        match usages.get(field) {
            Some(usage) => println!(
                "{:<16} {:<14} {}",
                field.name(),
                usage.mode.label(),
                usage.selected
            ),
            None => println!("{:<16} {:<14} {}", field.name(), "-", false),
        }
    }

    Ok(())
}
