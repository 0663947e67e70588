pub mod alphabet;
pub mod chunker;
pub mod error;
pub mod reader;
pub mod record;
pub mod semitic;

pub use alphabet::Alphabet;
pub use chunker::{ChunkReport, ChunkerConfig, CsvChunker};
pub use error::ReaderError;
pub use reader::{DroppedRow, ReadReport, ReaderConfig, SourceReader};
pub use record::{Record, truncate_with_ellipsis};
pub use semitic::{SemRootRow, SemWordRow, read_sem_roots, read_sem_words};
