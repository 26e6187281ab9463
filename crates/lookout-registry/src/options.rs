//! Dial options applied to resolved gRPC endpoints.
//!
//! The registry accumulates a list of options via
//! [`Registry::add_option`](crate::registry::Registry::add_option); each
//! option maps onto a tonic `Endpoint` builder setting when the resolver
//! constructs connections.

use std::time::Duration;

use tonic::transport::Endpoint;

/// A single dial-time setting for resolved connections.
#[derive(Debug, Clone)]
pub enum DialOption {
    /// Timeout for establishing the TCP/HTTP2 connection.
    ConnectTimeout(Duration),

    /// Per-request timeout applied to calls over the connection.
    RequestTimeout(Duration),

    /// Whether to set `TCP_NODELAY` on the connection.
    TcpNodelay(bool),

    /// Maximum number of in-flight requests per connection.
    ConcurrencyLimit(usize),
}

/// Applies a list of dial options to a tonic endpoint builder.
pub(crate) fn apply(mut endpoint: Endpoint, options: &[DialOption]) -> Endpoint {
    for option in options {
        endpoint = match option {
            DialOption::ConnectTimeout(timeout) => endpoint.connect_timeout(*timeout),
            DialOption::RequestTimeout(timeout) => endpoint.timeout(*timeout),
            DialOption::TcpNodelay(enabled) => endpoint.tcp_nodelay(*enabled),
            DialOption::ConcurrencyLimit(limit) => endpoint.concurrency_limit(*limit),
        };
    }
    endpoint
}

/// Builds a tonic endpoint for a resolved `host:port` address with the
/// accumulated dial options applied.
pub(crate) fn build_endpoint(
    addr: &str,
    options: &[DialOption],
) -> Result<Endpoint, tonic::transport::Error> {
    let endpoint = Endpoint::from_shared(format!("http://{}", addr))?;
    Ok(apply(endpoint, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_endpoint_accepts_host_port() {
        let options = vec![
            DialOption::ConnectTimeout(Duration::from_secs(5)),
            DialOption::RequestTimeout(Duration::from_secs(10)),
            DialOption::TcpNodelay(true),
            DialOption::ConcurrencyLimit(64),
        ];
        let endpoint = build_endpoint("127.0.0.1:9000", &options).unwrap();
        assert_eq!(endpoint.uri().to_string(), "http://127.0.0.1:9000/");
    }

    #[test]
    fn test_build_endpoint_rejects_garbage() {
        assert!(build_endpoint("not a host", &[]).is_err());
    }
}
