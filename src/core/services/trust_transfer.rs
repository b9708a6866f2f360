use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::core::errors::{KeyTrustError, Result};
use crate::core::models::fingerprint::Fingerprint;
use crate::core::models::snapshot::{TRUST_STORE_VERSION, TrustSnapshot};
use crate::core::models::trust_entry::{TrustEntry, TrustStatus};

pub const CSV_HEADER: [&str; 10] = [
    "fingerprint",
    "status",
    "added_at",
    "added_by",
    "key_id",
    "source",
    "notes",
    "revoked_at",
    "revocation_reason",
    "permanent",
];

/// Wire format for trust store export and import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFormat {
    Json,
    Csv,
}

impl TransferFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferFormat::Json => "json",
            TransferFormat::Csv => "csv",
        }
    }
}

impl std::fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferFormat {
    type Err = KeyTrustError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(TransferFormat::Json),
            "csv" => Ok(TransferFormat::Csv),
            other => Err(KeyTrustError::InvalidArgument {
                detail: format!("unknown trust store format '{other}' (expected json or csv)"),
            }),
        }
    }
}

/// Serialize the trust store.
pub fn export(entries: Vec<TrustEntry>, format: TransferFormat, now: DateTime<Utc>) -> Result<String> {
    match format {
        TransferFormat::Json => {
            let snapshot = TrustSnapshot::from_entries(entries, now);
            serde_json::to_string_pretty(&snapshot).map_err(|e| KeyTrustError::format("trust export", e))
        }
        TransferFormat::Csv => Ok(to_csv(&entries)),
    }
}

/// Parse an export produced by [`export`] back into a snapshot.
///
/// CSV carries no metadata map and no deactivation flag; parsed entries
/// come back active with empty metadata.
pub fn parse(data: &str, format: TransferFormat, now: DateTime<Utc>) -> Result<TrustSnapshot> {
    match format {
        TransferFormat::Json => {
            let snapshot: TrustSnapshot =
                serde_json::from_str(data).map_err(|e| KeyTrustError::format("trust import", e))?;
            if snapshot.version > TRUST_STORE_VERSION {
                return Err(KeyTrustError::FormatVersionTooNew {
                    found: snapshot.version,
                    supported: TRUST_STORE_VERSION,
                });
            }
            Ok(snapshot)
        }
        TransferFormat::Csv => Ok(TrustSnapshot::from_entries(from_csv(data)?, now)),
    }
}

fn to_csv(entries: &[TrustEntry]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');
    for entry in entries {
        let row = [
            entry.fingerprint.as_str().to_string(),
            entry.status().as_str().to_string(),
            entry.added_at.to_rfc3339(),
            entry.added_by.clone(),
            entry.key_id.clone().unwrap_or_default(),
            entry.source.clone(),
            entry.notes.clone(),
            entry.revoked_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            entry.revocation_reason.clone().unwrap_or_default(),
            entry.permanent_revocation.to_string(),
        ];
        let fields: Vec<String> = row.iter().map(|f| quote(f)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn from_csv(data: &str) -> Result<Vec<TrustEntry>> {
    let mut records = split_records(data)?.into_iter();

    let header = records
        .next()
        .ok_or_else(|| KeyTrustError::format("trust CSV", "missing header row"))?;
    if header.iter().map(|h| h.trim()).ne(CSV_HEADER) {
        return Err(KeyTrustError::format(
            "trust CSV",
            format!("header must be '{}'", CSV_HEADER.join(",")),
        ));
    }

    records
        .enumerate()
        .filter(|(_, fields)| !(fields.len() == 1 && fields[0].trim().is_empty()))
        .map(|(index, fields)| entry_from_row(index + 2, fields))
        .collect()
}

fn entry_from_row(line: usize, fields: Vec<String>) -> Result<TrustEntry> {
    let [fingerprint, status, added_at, added_by, key_id, source, notes, revoked_at, reason, permanent] =
        <[String; 10]>::try_from(fields).map_err(|fields| {
            KeyTrustError::format(
                "trust CSV",
                format!("row {line} has {} fields, expected {}", fields.len(), CSV_HEADER.len()),
            )
        })?;

    let row_error = |detail: String| KeyTrustError::format("trust CSV", format!("row {line}: {detail}"));

    let fingerprint = Fingerprint::parse(&fingerprint).map_err(|e| row_error(e.to_string()))?;
    let status = match status.trim() {
        "trusted" => TrustStatus::Trusted,
        "revoked" => TrustStatus::Revoked,
        "permanently_revoked" => TrustStatus::PermanentlyRevoked,
        other => return Err(row_error(format!("unknown status '{other}'"))),
    };
    let permanent = match permanent.trim() {
        "true" => true,
        "false" | "" => false,
        other => return Err(row_error(format!("permanent must be true or false, got '{other}'"))),
    };
    let added_at = parse_time(&added_at).map_err(&row_error)?;
    let revoked_at = if revoked_at.trim().is_empty() {
        None
    } else {
        Some(parse_time(&revoked_at).map_err(&row_error)?)
    };

    let mut entry = TrustEntry {
        fingerprint,
        added_at,
        added_by,
        key_id: non_empty(key_id),
        source,
        notes,
        metadata: Default::default(),
        expires_at: None,
        is_active: true,
        revoked: status != TrustStatus::Trusted,
        revoked_at,
        revocation_reason: non_empty(reason),
        restored_at: None,
        restore_reason: None,
        permanent_revocation: permanent || status == TrustStatus::PermanentlyRevoked,
    };
    entry.normalize();
    Ok(entry)
}

fn parse_time(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{value}': {e}"))
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Split CSV text into records, honouring quoted fields that contain
/// commas, doubled quotes or line breaks.
fn split_records(data: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = data.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => record.push(std::mem::take(&mut field)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            other => field.push(other),
        }
    }

    if in_quotes {
        return Err(KeyTrustError::format("trust CSV", "unterminated quoted field"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::trust_entry::TrustOptions;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn entry(hex: &str) -> TrustEntry {
        TrustEntry::new(
            Fingerprint::parse(&hex.repeat(32)).unwrap(),
            TrustOptions::default().added_by("ops"),
            at(),
        )
    }

    #[test]
    fn csv_permanent_column_implies_revoked() {
        let csv = format!(
            "{}\n{},trusted,2026-05-01T12:00:00Z,ops,,manual,,,,true\n",
            CSV_HEADER.join(","),
            "ab".repeat(32)
        );

        let snapshot = parse(&csv, TransferFormat::Csv, at()).unwrap();

        let entry = &snapshot.entries[0];
        assert!(entry.permanent_revocation);
        assert!(entry.revoked);
        assert!(!entry.is_trusted());
    }

    fn revoked(hex: &str, reason: &str) -> TrustEntry {
        let mut e = entry(hex);
        e.revoked = true;
        e.revoked_at = Some(at());
        e.revocation_reason = Some(reason.to_string());
        e
    }

    #[test]
    fn format_names_parse_case_insensitively() {
        assert_eq!("JSON".parse::<TransferFormat>().unwrap(), TransferFormat::Json);
        assert_eq!("csv".parse::<TransferFormat>().unwrap(), TransferFormat::Csv);
        assert!("xml".parse::<TransferFormat>().is_err());
    }

    #[test]
    fn json_export_lists_revoked_fingerprints() {
        let text = export(vec![entry("aa"), revoked("bb", "leaked")], TransferFormat::Json, at()).unwrap();
        let snapshot = parse(&text, TransferFormat::Json, at()).unwrap();

        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.revoked_fingerprints, vec![Fingerprint::parse(&"bb".repeat(32)).unwrap()]);
    }

    #[test]
    fn csv_quotes_awkward_notes() {
        let mut e = revoked("cc", "key \"lost\", rotated");
        e.notes = "line one\nline two".to_string();

        let text = export(vec![e.clone()], TransferFormat::Csv, at()).unwrap();
        assert!(text.starts_with("fingerprint,status,added_at,"));
        assert!(text.contains("\"key \"\"lost\"\", rotated\""));

        let snapshot = parse(&text, TransferFormat::Csv, at()).unwrap();
        assert_eq!(snapshot.entries, vec![e]);
        assert_eq!(snapshot.revoked_fingerprints.len(), 1);
    }

    #[test]
    fn csv_permanent_status_sets_flag() {
        let mut e = revoked("dd", "compromised");
        e.permanent_revocation = true;

        let text = export(vec![e], TransferFormat::Csv, at()).unwrap();
        assert!(text.contains(",permanently_revoked,"));

        let parsed = parse(&text, TransferFormat::Csv, at()).unwrap();
        assert_eq!(parsed.entries[0].status(), TrustStatus::PermanentlyRevoked);
    }

    #[test]
    fn malformed_payloads_are_format_errors() {
        use crate::core::errors::ErrorKind;

        let cases = [
            ("{not json", TransferFormat::Json),
            ("wrong,header\n", TransferFormat::Csv),
            ("", TransferFormat::Csv),
        ];
        for (data, format) in cases {
            let err = parse(data, format, at()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::FormatError, "{data:?}");
        }

        let short_row = format!("{}\n{},trusted\n", CSV_HEADER.join(","), "aa".repeat(32));
        assert_eq!(
            parse(&short_row, TransferFormat::Csv, at()).unwrap_err().kind(),
            ErrorKind::FormatError
        );

        let bad_fp = format!(
            "{}\nnot-a-fingerprint,trusted,2026-05-01T12:00:00+00:00,ops,,manual,,,,false\n",
            CSV_HEADER.join(",")
        );
        assert_eq!(
            parse(&bad_fp, TransferFormat::Csv, at()).unwrap_err().kind(),
            ErrorKind::FormatError
        );
    }

    #[test]
    fn header_only_csv_is_empty_store() {
        let text = format!("{}\r\n", CSV_HEADER.join(","));
        let snapshot = parse(&text, TransferFormat::Csv, at()).unwrap();
        assert!(snapshot.entries.is_empty());
    }
}
