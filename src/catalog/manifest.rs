//! Static manifest parsing.
//!
//! Two shapes are accepted:
//!
//! - an array of descriptor objects, as written by packaging;
//! - the compact `{"list": ["ff,fsf,psn,flg,cat,url", ...]}` form, where
//!   empty fields inherit from the previous row and identities/paths are
//!   derived from the family name when omitted.

use serde::Deserialize;

use crate::catalog::descriptor::AssetDescriptor;
use crate::catalog::ManifestError;

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestDocument {
    Full(Vec<AssetDescriptor>),
    Compact { list: Vec<String> },
}

/// Parse manifest text into descriptors, in manifest order.
pub fn parse(text: &str) -> Result<Vec<AssetDescriptor>, ManifestError> {
    match serde_json::from_str::<ManifestDocument>(text)? {
        ManifestDocument::Full(descriptors) => Ok(descriptors),
        ManifestDocument::Compact { list } => expand_compact(list.as_slice()),
    }
}

/// Expand compact rows into full descriptors.
///
/// Row layout is `ff,fsf,psn,flg,cat,url`:
/// - empty `ff`, `fsf`, `flg`, `cat` repeat the previous row's value;
/// - empty `psn` becomes `ff-fsf` with spaces removed, `a` becomes `ff` with spaces removed;
/// - empty `url` becomes `fs/<psn>.otf`, `a` becomes `gf/<psn>.otf`.
pub fn expand_compact<S: AsRef<str>>(rows: &[S]) -> Result<Vec<AssetDescriptor>, ManifestError> {
    let mut out = Vec::with_capacity(rows.len());
    let mut prev_ff = String::new();
    let mut prev_fsf = String::new();
    let mut prev_flg = "0".to_string();
    let mut prev_cat = "0".to_string();

    for (index, row) in rows.iter().enumerate() {
        let row = row.as_ref();
        let fields: Vec<&str> = row.split(',').collect();
        let [ff, fsf, psn, flg, cat, url] = fields[..] else {
            return Err(ManifestError::CompactRow {
                index,
                row: row.to_string(),
            });
        };

        let ff = if ff.is_empty() { prev_ff.clone() } else { ff.to_string() };
        let fsf = if fsf.is_empty() { prev_fsf.clone() } else { fsf.to_string() };
        let flg = if flg.is_empty() { prev_flg.clone() } else { flg.to_string() };
        let cat = if cat.is_empty() { prev_cat.clone() } else { cat.to_string() };

        let psn = match psn {
            "" => format!("{ff}-{fsf}").replace(' ', ""),
            "a" => ff.replace(' ', ""),
            other => other.to_string(),
        };
        let url = match url {
            "" => format!("fs/{psn}.otf"),
            "a" => format!("gf/{psn}.otf"),
            other => other.to_string(),
        };

        let parse_num = |value: &str| {
            value.parse::<i64>().map_err(|_| ManifestError::CompactRow {
                index,
                row: row.to_string(),
            })
        };

        out.push(AssetDescriptor {
            psn,
            url,
            ff: ff.clone(),
            fsf: fsf.clone(),
            flg: parse_num(&flg)?,
            cat: parse_num(&cat)?,
        });

        prev_ff = ff;
        prev_fsf = fsf;
        prev_flg = flg;
        prev_cat = cat;
    }

    Ok(out)
}
