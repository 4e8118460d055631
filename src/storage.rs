use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub source_dir: PathBuf,
    pub geo_dir: PathBuf,
    pub source_csv: PathBuf,
    pub cache_parquet: PathBuf,
    pub meta_path: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir: PathBuf = data_dir.into();
        let source_dir = data_dir.join("source");
        let geo_dir = data_dir.join("geo");
        let source_csv = source_dir.join("us_er_transformed.csv");
        let cache_parquet = data_dir.join("facilities.parquet");
        let meta_path = data_dir.join("meta.json");

        Self {
            source_dir,
            geo_dir,
            source_csv,
            cache_parquet,
            meta_path,
        }
    }

    pub fn geonames_us_txt(&self) -> PathBuf {
        self.geo_dir.join("US.txt")
    }

    pub fn geonames_us_zip(&self) -> PathBuf {
        self.geo_dir.join("US.zip")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.source_dir)?;
        std::fs::create_dir_all(&self.geo_dir)?;
        Ok(())
    }
}

pub fn file_present_nonempty(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(m) => m.is_file() && m.len() > 0,
        Err(_) => false,
    }
}
