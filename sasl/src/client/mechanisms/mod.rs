//! Provides a few SASL mechanisms.

mod anonymous;
mod digest_md5;
mod external;
mod plain;
mod scram;

pub use self::anonymous::Anonymous;
pub use self::digest_md5::DigestMd5;
pub use self::external::External;
pub use self::plain::Plain;
pub use self::scram::Scram;
