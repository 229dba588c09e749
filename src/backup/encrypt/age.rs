use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use age::armor::{ArmoredWriter, Format};
use age::Recipient;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub static AGE_FILE_EXT: &str = "age";

/// Parses every recipient line of a public-key file.
///
/// Accepts native age X25519 keys (`age1...`) and SSH public keys. Blank lines
/// and `#` comments are ignored. Any other line is an error.
pub fn parse_recipients(text: &str) -> std::result::Result<Vec<Box<dyn Recipient>>, String> {
    let mut recipients: Vec<Box<dyn Recipient>> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Ok(r) = line.parse::<age::x25519::Recipient>() {
            recipients.push(Box::new(r));
        } else if let Ok(r) = line.parse::<age::ssh::Recipient>() {
            recipients.push(Box::new(r));
        } else {
            return Err(format!("line {} is not an age or ssh public key", idx + 1));
        }
    }
    if recipients.is_empty() {
        return Err("file contains no public key".to_string());
    }
    Ok(recipients)
}

pub fn read_recipients(path: &Path) -> Result<Vec<Box<dyn Recipient>>> {
    let text = std::fs::read_to_string(path)?;
    parse_recipients(&text).map_err(|reason| Error::invalid_recipient(path, reason))
}

pub fn encrypted_path(src: &Path) -> PathBuf {
    let mut name = src.as_os_str().to_owned();
    name.push(".");
    name.push(AGE_FILE_EXT);
    PathBuf::from(name)
}

/// Encrypts `src` to every recipient at once, writing `<src>.age`.
///
/// The plaintext is left alone; a partially written ciphertext is removed on failure.
pub fn encrypt_file(src: &Path, recipients: &[Box<dyn Recipient>], armor: bool) -> Result<PathBuf> {
    let dst = encrypted_path(src);
    let res = write_ciphertext(src, &dst, recipients, armor);
    if res.is_err() && dst.exists() {
        if let Err(e) = std::fs::remove_file(&dst) {
            tracing::warn!("Cannot remove partial ciphertext {:?}: {e}", dst);
        }
    }
    res.map(|_| dst)
}

fn write_ciphertext(
    src: &Path,
    dst: &Path,
    recipients: &[Box<dyn Recipient>],
    armor: bool,
) -> Result<()> {
    let encryptor =
        age::Encryptor::with_recipients(recipients.iter().map(|r| r.as_ref() as &dyn Recipient))?;
    let format = if armor {
        Format::AsciiArmor
    } else {
        Format::Binary
    };

    let mut input = File::open(src)?;
    let output = File::create_new(dst).map(BufWriter::new)?;
    let mut writer = encryptor.wrap_output(ArmoredWriter::wrap_output(output, format)?)?;
    std::io::copy(&mut input, &mut writer)?;

    writer.finish()?.finish()?.finish()?.sync_all()?;
    Ok(())
}
