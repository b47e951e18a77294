pub mod cache;
pub mod codec;
pub mod directory;
pub mod error;
pub mod flush;
pub mod format;
pub mod layout;
pub mod options;
pub mod padding;
pub mod pool;
pub mod raw_writer;
pub mod reader;
pub mod sink;
pub mod sparse;
pub mod store;
pub mod writer;

pub use cache::BlockCache;
pub use codec::{Codec, CodecClass, CodecParams};
pub use directory::{BlockDirectory, BlockLocation, LayoutGuarantee, LocationTable};
pub use error::{Error, Result};
pub use flush::FlushCoordinator;
pub use format::{IndexEntry, Rtc1Header, HEADER_SIZE, MAGIC};
pub use layout::{BlockGeometry, PlanarConfig, RasterLayout, SampleType};
pub use options::{OptionPair, WriterOptions};
pub use padding::{pad_edges, BlockShape, PadPolicy};
pub use pool::{CompressionJobPool, CompressionRequest};
pub use raw_writer::RawBlockWriter;
pub use reader::{FramingReport, Reader};
pub use sink::{BlockSink, JobOutcome, SharedSink};
pub use sparse::{fill_background, materialize_all_pending_sparse, SparseBlockPolicy};
pub use store::BlockStore;
pub use writer::{CloseSummary, RasterWriter};
