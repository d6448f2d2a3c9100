use super::P1Error;
use crate::obis_utils;
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct TelegramLine {
    pub reference: String,
    pub fields: Vec<String>,
}

impl TelegramLine {
    /// Fields are counted from 1, like `value_field` in the config
    pub fn field(&self, nr: usize) -> Result<&str, P1Error> {
        if nr == 0 || nr > self.fields.len() {
            return Err(P1Error::MissingField {
                reference: self.reference.clone(),
                field: nr,
                available: self.fields.len(),
            });
        }
        Ok(&self.fields[nr - 1])
    }
}

/// Split a telegram line into its OBIS reference and the parenthesized fields.
/// Returns `None` for header, footer and checksum lines.
pub fn parse_line(line: &str) -> Option<TelegramLine> {
    // Example: 0-1:24.2.1(181007192000S)(00004.239*m3)
    let mut parts = line.trim().split('(');

    let reference = parts.next().unwrap_or("").trim().to_string();
    if !obis_utils::is_data_reference(&reference) {
        debug!("skipping line that starts with: {}", reference);
        return None;
    }

    let fields = parts
        .map(|part| part.strip_suffix(')').unwrap_or(part).to_string())
        .collect();

    Some(TelegramLine { reference, fields })
}
