pub mod descriptor;
pub mod value;
pub mod serialization;
pub mod cipher;
pub mod entropy;
pub mod argument;

pub use descriptor::{Descriptor, Storage};
pub use value::{Field, Scalar};
pub use serialization::{marshal, unmarshal, inspect, Record, SerializeError};
pub use cipher::{CipherContext, CipherProfile};
pub use entropy::{EntropySource, SystemEntropy};
pub use argument::{Argument, StubCodec, StubError, StubHeader, StubOptions};
