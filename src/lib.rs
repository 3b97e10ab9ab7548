//! # echostore - Chunked Array Stores for Echosounder Data
//!
//! `echostore` turns per-ping echosounder records into hierarchical,
//! chunked array stores, and merges the stores of many raw files into one.
//!
//! ## Key Features
//!
//! - **Padded Writes**: ragged per-ping sample arrays are laid out on a
//!   dense (ping time × channel) grid and right-padded with NaN, so every
//!   stored array is rectangular.
//!
//! - **Bounded Memory**: fields are written in time chunks sized from a
//!   memory budget, one chunk in flight at a time.
//!
//! - **Efficient Storage**: each chunk is a Parquet file with ZSTD
//!   compression and BYTE_STREAM_SPLIT encoding of floats.
//!
//! - **Policy-Driven Combine**: stores of one instrument are merged group by
//!   group with a per-(model, group) strategy table.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use echostore::record::{DatagramRecord, FieldBatch};
//! use echostore::store::Store;
//! use echostore::writer::{write_batches, WriterConfig};
//!
//! let store = Store::create("D20170615-T190214.zarr")?;
//! let records = vec![
//!     DatagramRecord::new(1_497_553_334_000, "GPT 38 kHz", vec![-60.2, -61.0, -64.3]),
//!     DatagramRecord::new(1_497_553_334_000, "GPT 120 kHz", vec![-71.5, -72.0]),
//! ];
//! let batches = vec![FieldBatch::new("Beam", "backscatter_r", records)];
//!
//! let report = write_batches(&store, &batches, &WriterConfig::default());
//! println!("{report}");
//! store.finalize()?;
//! # Ok::<(), echostore::store::StoreError>(())
//! ```
//!
//! This creates a directory structure:
//! ```text
//! D20170615-T190214.zarr/
//! ├── group.json
//! ├── consolidated.json
//! └── Beam/
//!     ├── group.json
//!     ├── ping_time/      # Int64 coordinate
//!     ├── channel/        # Utf8 coordinate
//!     └── backscatter_r/  # Float64 (ping_time, channel, range_sample)
//! ```
//!
//! ## Architecture
//!
//! - [`record`]: per-ping input records and field batches
//! - [`store`]: the hierarchical chunked array store
//! - [`writer`]: padded index, chunk partitioner and ragged array writer
//! - [`reader`]: reads fields back into records
//! - [`combine`]: multi-store combine engine
//! - [`convert`]: per-file conversion orchestration
//! - [`config`]: TOML configuration

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod combine;
pub mod config;
pub mod convert;
pub mod reader;
pub mod record;
pub mod store;
pub mod writer;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::combine::{
        CombineConfig, CombineError, CombineOutcome, CombineReport, MergeStrategy, PolicyTable,
        SkipReason, SonarModel, StoreCombiner,
    };
    pub use crate::config::{Config, ConfigError};
    pub use crate::convert::{
        ConversionParams, ConversionReport, ConvertConfig, ConvertError, Converter,
        DatagramParser, FileOutcome, ParsedFile,
    };
    pub use crate::reader::{read_coordinates, read_field, Coordinates, ReaderError};
    pub use crate::record::{default_dims, DatagramRecord, FieldBatch};
    pub use crate::store::{ArrayData, DataType, Group, Store, StoreConfig, StoreError};
    pub use crate::writer::{
        write_batches, write_field, BatchReport, FieldStats, WriterConfig, WriterError,
    };
}
