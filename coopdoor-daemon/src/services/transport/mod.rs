mod unix;

pub use unix::UnixTransport;
