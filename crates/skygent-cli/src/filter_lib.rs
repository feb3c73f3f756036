//! The on-disk filter library: `<store-root>/filters/<name>.json`.

use std::path::PathBuf;

use skygent_filter::{
    FilterExpr, FilterHash, FilterLibrary, FilterLibraryError, expr_hash,
};

pub struct FsFilterLibrary {
    dir: PathBuf,
}

impl FsFilterLibrary {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        Self {
            dir: store_root.into().join("filters"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn save(&self, name: &str, expr: &FilterExpr) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(name);
        let json = serde_json::to_string_pretty(expr).expect("expressions serialize");
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn list(&self) -> std::io::Result<Vec<(String, FilterHash)>> {
        let mut entries = Vec::new();
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(json) = std::fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(expr) = serde_json::from_str::<FilterExpr>(&json) {
                entries.push((name.to_owned(), expr_hash(&expr)));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

impl FilterLibrary for FsFilterLibrary {
    fn resolve(&self, name: &str) -> Result<FilterExpr, FilterLibraryError> {
        let path = self.path(name);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FilterLibraryError::NotFound {
                    name: name.to_owned(),
                });
            }
            Err(e) => {
                return Err(FilterLibraryError::Library {
                    source: Box::new(e),
                });
            }
        };
        serde_json::from_str(&json).map_err(|e| FilterLibraryError::Library {
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use skygent_core::Hashtag;

    use super::*;

    #[test]
    fn save_resolve_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let library = FsFilterLibrary::new(dir.path());

        let expr = FilterExpr::Hashtag {
            tag: Hashtag::new("#ai").unwrap(),
        };
        library.save("ai", &expr).unwrap();

        assert_eq!(library.resolve("ai").unwrap(), expr);
        assert!(matches!(
            library.resolve("missing"),
            Err(FilterLibraryError::NotFound { .. })
        ));

        let listed = library.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "ai");
        assert_eq!(listed[0].1, expr_hash(&expr));
    }
}
