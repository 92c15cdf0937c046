pub mod badge;
pub mod connection;
pub mod dispatcher;
pub mod live;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;
