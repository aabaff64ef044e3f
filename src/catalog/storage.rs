//! Persistence for the catalog index.
//!
//! Two artifacts, both required, rebuilt wholesale when either is missing:
//!
//! `catalog_embeddings.bin` header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the embedding model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//! followed by `entry_count` rows of `[f32; dimensions]` (little-endian).
//!
//! `catalog_product_ids.json`: JSON string array, parallel to the rows.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum CatalogStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid product id list: {0}")]
    InvalidProductIds(#[from] serde_json::Error),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file was built with a different embedding model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Artifacts are not parallel: {embeddings} embedding rows vs {ids} product ids")]
    ParallelMismatch { embeddings: usize, ids: usize },
}

/// Storage manager for the two catalog artifacts.
pub struct CatalogStorage {
    embeddings_path: PathBuf,
    product_ids_path: PathBuf,
}

impl CatalogStorage {
    pub fn new(embeddings_path: PathBuf, product_ids_path: PathBuf) -> Self {
        Self {
            embeddings_path,
            product_ids_path,
        }
    }

    /// Both artifacts present. Either one missing means a wholesale rebuild.
    pub fn exists(&self) -> bool {
        self.embeddings_path.is_file() && self.product_ids_path.is_file()
    }

    /// Load both artifacts, validating model id, dimensions, checksum and
    /// that the two files are parallel.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(Vec<Vec<f32>>, Vec<String>), CatalogStorageError> {
        let file = File::open(&self.embeddings_path)?;
        let mut reader = BufReader::new(file);

        let header = self.read_header(&mut reader)?;
        self.validate_header(&header, expected_model_id, expected_dimensions)?;

        let mut embeddings = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            embeddings.push(self.read_row(&mut reader, header.dimensions as usize)?);
        }

        let ids_bytes = std::fs::read(&self.product_ids_path)?;
        let product_ids: Vec<String> = serde_json::from_slice(&ids_bytes)?;

        if product_ids.len() != embeddings.len() {
            return Err(CatalogStorageError::ParallelMismatch {
                embeddings: embeddings.len(),
                ids: product_ids.len(),
            });
        }

        Ok((embeddings, product_ids))
    }

    /// Save both artifacts. Each uses atomic write: temp file -> fsync -> rename.
    pub fn save(
        &self,
        embeddings: &[Vec<f32>],
        product_ids: &[String],
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<(), CatalogStorageError> {
        if embeddings.len() != product_ids.len() {
            return Err(CatalogStorageError::ParallelMismatch {
                embeddings: embeddings.len(),
                ids: product_ids.len(),
            });
        }

        if let Some(parent) = self.embeddings_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = self.embeddings_path.with_extension("tmp");
        let result = self.write_embeddings(&temp_path, embeddings, model_id, dimensions);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }
        std::fs::rename(&temp_path, &self.embeddings_path)?;

        let ids_temp = self.product_ids_path.with_extension("tmp");
        let ids_json = serde_json::to_vec(product_ids)?;
        if let Err(err) = std::fs::write(&ids_temp, ids_json) {
            let _ = std::fs::remove_file(&ids_temp);
            return Err(err.into());
        }
        std::fs::rename(&ids_temp, &self.product_ids_path)?;

        Ok(())
    }

    /// Remove both artifacts if present.
    pub fn delete(&self) -> Result<(), CatalogStorageError> {
        for path in [&self.embeddings_path, &self.product_ids_path] {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn write_embeddings(
        &self,
        path: &Path,
        embeddings: &[Vec<f32>],
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<(), CatalogStorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: dimensions as u16,
            entry_count: embeddings.len() as u64,
        };
        self.write_header(&mut writer, &header)?;

        for row in embeddings {
            if row.len() != dimensions {
                return Err(CatalogStorageError::DimensionMismatch {
                    expected: dimensions,
                    got: row.len(),
                });
            }
            for &value in row {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(&self, reader: &mut BufReader<File>) -> Result<Header, CatalogStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];
        if version > FORMAT_VERSION {
            return Err(CatalogStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
        let entry_count = u64::from_le_bytes(
            header_bytes[35..43]
                .try_into()
                .expect("8 header bytes for entry count"),
        );
        let stored_checksum = u32::from_le_bytes(
            header_bytes[43..47]
                .try_into()
                .expect("4 header bytes for checksum"),
        );

        let computed_checksum = crc32fast::hash(&header_bytes[0..43]);
        if stored_checksum != computed_checksum {
            return Err(CatalogStorageError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
        })
    }

    fn validate_header(
        &self,
        header: &Header,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(), CatalogStorageError> {
        if header.model_id != *expected_model_id {
            return Err(CatalogStorageError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(CatalogStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(())
    }

    fn write_header(
        &self,
        writer: &mut BufWriter<File>,
        header: &Header,
    ) -> Result<(), CatalogStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_row(
        &self,
        reader: &mut BufReader<File>,
        dimensions: usize,
    ) -> Result<Vec<f32>, CatalogStorageError> {
        let mut row = Vec::with_capacity(dimensions);
        let mut float_bytes = [0u8; 4];
        for _ in 0..dimensions {
            reader.read_exact(&mut float_bytes)?;
            row.push(f32::from_le_bytes(float_bytes));
        }
        Ok(row)
    }
}

/// Embeddings file header.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}
