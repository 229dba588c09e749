//! Validation functions for configuration values.

use chrono::{DateTime, Local, TimeZone};
use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::fmt::{Display, Write};
use std::path::Path;

pub fn validate_sanitized_file_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || !is_sanitized(name) {
        return Err(ValidationError::new("InvalidFileName").with_message(
            format!(
                "{:?} is not usable as a directory name, try sanitizing like {:?}",
                name,
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

/// Every entry must be usable as a file name.
pub fn validate_sanitized_file_names(names: &[String]) -> Result<(), ValidationError> {
    names.iter().try_for_each(validate_sanitized_file_name)
}

/// Renders a strftime pattern without panicking on unknown specifiers.
pub fn render_date_format<Tz: TimeZone>(format: &str, at: &DateTime<Tz>) -> Option<String>
where
    Tz::Offset: Display,
{
    let mut rendered = String::new();
    write!(rendered, "{}", at.format(format)).ok()?;
    Some(rendered)
}

pub fn validate_date_format<S: AsRef<str>>(format: S) -> Result<(), ValidationError> {
    let format = format.as_ref();
    match render_date_format(format, &Local::now()) {
        Some(label) => validate_sanitized_file_name(label),
        None => Err(ValidationError::new("InvalidDateFormat")
            .with_message(format!("Invalid date format: {format:?}").into())),
    }
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
        if let Err(e) = std::fs::read_dir(dir) {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("cannot read {:?}: {}", dir, e).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access output_root path {:?}: {}", dir, e).into(),
            )
        });
    }

    Ok(())
}
