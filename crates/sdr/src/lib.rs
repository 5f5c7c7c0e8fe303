pub mod device;
pub mod file;
pub mod sample;
pub mod sim;
pub mod sink;

#[cfg(feature = "usrp")]
pub mod usrp;

pub use device::{
    DeviceError, Direction, Frontend, Radio, RxErrorCode, RxMetadata, RxStreamer, SensorValue,
    StreamArgs, StreamCmd, StreamMode, TimeSpec, TuneRequest, TxMetadata, TxStreamer,
};
pub use file::{BlockRead, FileSampleSource};
pub use sample::{Sample, SampleBlock, SampleFormat, UnknownSampleFormat};
pub use sink::{channel_filename, ChannelFileSink};
