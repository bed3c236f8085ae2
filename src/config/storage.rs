use serde::{Serialize, Deserialize};
use rocksdb::{DBCompressionType, Options};

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Create the database if it is missing
    pub create_if_missing: bool,

    /// Maximum open files
    pub max_open_files: i32,

    /// Write buffer size in MB
    pub write_buffer_size: usize,

    /// Maximum write buffer number
    pub max_write_buffer_number: i32,

    /// Compression type (none, snappy, lz4, zstd, zlib)
    pub compression_type: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_open_files: 1000,
            write_buffer_size: 64, // 64MB
            max_write_buffer_number: 3,
            compression_type: "lz4".to_string(),
        }
    }
}

impl StorageConfig {
    /// Build RocksDB options from this configuration
    pub fn to_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(self.create_if_missing);
        opts.set_max_open_files(self.max_open_files);
        opts.set_write_buffer_size(self.write_buffer_size * 1024 * 1024);
        opts.set_max_write_buffer_number(self.max_write_buffer_number);
        opts.set_compression_type(match self.compression_type.as_str() {
            "snappy" => DBCompressionType::Snappy,
            "lz4" => DBCompressionType::Lz4,
            "zstd" => DBCompressionType::Zstd,
            "zlib" => DBCompressionType::Zlib,
            _ => DBCompressionType::None,
        });
        opts
    }
}
