use crate::backup::compression::Compression;
use crate::storage::RemoteFile;
use chrono::NaiveDateTime;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// {name}_{YYYYMMDD_HHMMSS}.{ext}, e.g. mydb_20240115_143022.sql.gz
fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+)_(\d{8}_\d{6})\.(.+)$").expect("backup filename pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub db_name: String,
    pub timestamp: NaiveDateTime,
}

/// A remote file that belongs to a database, with the timestamp embedded in
/// its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub file: RemoteFile,
    pub timestamp: NaiveDateTime,
}

pub fn backup_filename(
    db_name: &str,
    timestamp: NaiveDateTime,
    extension: &str,
    compression: Compression,
) -> String {
    format!(
        "{}_{}{}{}",
        db_name,
        timestamp.format(TIMESTAMP_FORMAT),
        extension,
        compression.extension()
    )
}

/// Splits a backup filename into its database name and timestamp. Any
/// directory prefix is ignored. Returns `None` for files that do not follow
/// the naming convention.
pub fn parse_filename(filename: &str) -> Option<ParsedName> {
    let base = Path::new(filename).file_name()?.to_str()?;
    let captures = filename_pattern().captures(base)?;
    let timestamp = NaiveDateTime::parse_from_str(&captures[2], TIMESTAMP_FORMAT).ok()?;

    Some(ParsedName {
        db_name: captures[1].to_string(),
        timestamp,
    })
}

/// Keeps the files owned by `db_name` (case-insensitive), newest first by
/// embedded timestamp. Files not following the convention are skipped.
pub fn backups_for(files: &[RemoteFile], db_name: &str) -> Vec<BackupFile> {
    let wanted = db_name.to_lowercase();

    let mut backups: Vec<BackupFile> = files
        .iter()
        .filter_map(|f| {
            let parsed = parse_filename(&f.name)?;
            (parsed.db_name.to_lowercase() == wanted).then(|| BackupFile {
                file: f.clone(),
                timestamp: parsed.timestamp,
            })
        })
        .collect();

    backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    backups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    fn remote(name: &str) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            size: 1,
            mod_time: Utc::now(),
        }
    }

    #[test]
    fn test_parse_filename() {
        let cases = [
            ("mydb_20240115_143022.sql.gz", Some(("mydb", "20240115_143022"))),
            ("backups/mydb_20240115_143022.sql.gz", Some(("mydb", "20240115_143022"))),
            ("sqlite_db_20240115_143022.db.zst", Some(("sqlite_db", "20240115_143022"))),
            ("my_database_name_20240115_143022.sql", Some(("my_database_name", "20240115_143022"))),
            ("mydb_20240115_143022", None),
            ("mydb_2024-01-15_14:30:22.sql.gz", None),
            ("mydb_20241315_143022.sql", None),
            ("mydb.sql.gz", None),
            ("readme.txt", None),
            ("", None),
        ];

        for (filename, expected) in cases {
            let parsed = parse_filename(filename);
            match expected {
                Some((name, stamp)) => {
                    let parsed = parsed.unwrap_or_else(|| panic!("{} should parse", filename));
                    assert_eq!(parsed.db_name, name);
                    assert_eq!(parsed.timestamp, ts(stamp));
                }
                None => assert!(parsed.is_none(), "{} should not parse", filename),
            }
        }
    }

    #[test]
    fn test_generated_names_parse_back() {
        let stamp = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(14, 30, 22)
            .unwrap();

        for (name, ext, compression) in [
            ("mydb", ".sql", Compression::Gzip),
            ("app_data", ".db", Compression::None),
            ("x-1", ".bak", Compression::Zip),
        ] {
            let filename = backup_filename(name, stamp, ext, compression);
            let parsed = parse_filename(&filename).unwrap();
            assert_eq!(parsed.db_name, name);
            assert_eq!(parsed.timestamp, stamp);
        }
        assert_eq!(
            backup_filename("mydb", stamp, ".sql", Compression::Gzip),
            "mydb_20240115_143022.sql.gz"
        );
    }

    #[test]
    fn test_backups_for_filters_and_sorts() {
        let files = vec![
            remote("mydb_20240101_000000.sql.gz"),
            remote("otherdb_20240105_000000.sql.gz"),
            remote("mydb_20240103_000000.sql.gz"),
            remote("notes.txt"),
            remote("mydb_20240102_000000.sql"),
        ];

        let names: Vec<String> = backups_for(&files, "mydb")
            .into_iter()
            .map(|b| b.file.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "mydb_20240103_000000.sql.gz",
                "mydb_20240102_000000.sql",
                "mydb_20240101_000000.sql.gz",
            ]
        );
    }

    #[test]
    fn test_backups_for_is_case_insensitive() {
        let files = vec![
            remote("MyDB_20240101_000000.sql"),
            remote("mydb_20240102_000000.sql"),
        ];
        assert_eq!(backups_for(&files, "mydb"), backups_for(&files, "MyDB"));
        assert_eq!(backups_for(&files, "MYDB").len(), 2);
    }
}
