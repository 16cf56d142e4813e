//! DNS SRV lookup and Happy Eyeballs TCP connect.

use std::net::SocketAddr;

use futures::{future::select_ok, FutureExt};
use hickory_resolver::{
    config::LookupIpStrategy, name_server::TokioConnectionProvider, IntoName, TokioAsyncResolver,
};
use log::debug;
use tokio::net::TcpStream;

use crate::error::ConnectorError;
use crate::session::{Config, ServerConfig, Session, TlsPolicy};
use crate::Error;

/// A resolved SRV record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrvTarget {
    /// Lower is tried first.
    pub priority: u16,
    /// Higher is tried first among equal priorities.
    pub weight: u16,
    /// Host name.
    pub target: String,
    /// TCP port.
    pub port: u16,
}

/// Orders SRV records by ascending priority, then descending weight.
pub fn order_records(records: &mut [SrvTarget]) {
    records.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.weight.cmp(&a.weight))
    });
}

/// Connects to every address of `domain` at once and keeps the first to answer.
pub async fn connect_to_host(domain: &str, port: u16) -> Result<TcpStream, Error> {
    let ascii_domain = idna::domain_to_ascii(domain).map_err(|_| Error::Idna)?;

    if let Ok(ip) = ascii_domain.parse() {
        debug!("Attempting connection to {ip}:{port}");
        return Ok(TcpStream::connect(&SocketAddr::new(ip, port)).await?);
    }

    let (config, mut options) =
        hickory_resolver::system_conf::read_system_conf().map_err(ConnectorError::Resolve)?;
    options.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
    let resolver = TokioAsyncResolver::new(config, options, TokioConnectionProvider::default());

    let ips = resolver
        .lookup_ip(ascii_domain)
        .await
        .map_err(ConnectorError::Resolve)?;
    let attempts: Vec<_> = ips
        .into_iter()
        .map(|ip| TcpStream::connect(SocketAddr::new(ip, port)).boxed())
        .collect();
    if attempts.is_empty() {
        return Err(ConnectorError::AllFailed.into());
    }
    // Happy Eyeballs: connect to all records in parallel, return the
    // first to succeed
    select_ok(attempts)
        .await
        .map(|(result, _)| result)
        .map_err(|_| ConnectorError::AllFailed.into())
}

/// Connects through the `srv` records of `domain`, or to `domain:fallback_port` when
/// there are none.
pub async fn connect_with_srv(
    domain: &str,
    srv: &str,
    fallback_port: u16,
) -> Result<TcpStream, Error> {
    let ascii_domain = idna::domain_to_ascii(domain).map_err(|_| Error::Idna)?;

    if let Ok(ip) = ascii_domain.parse() {
        debug!("Attempting connection to {ip}:{fallback_port}");
        return Ok(TcpStream::connect(&SocketAddr::new(ip, fallback_port)).await?);
    }

    let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(ConnectorError::Resolve)?;

    let srv_domain = format!("{}.{}.", srv, ascii_domain)
        .into_name()
        .map_err(ConnectorError::Dns)?;
    let srv_records = resolver.srv_lookup(srv_domain.clone()).await.ok();

    match srv_records {
        Some(lookup) => {
            let mut targets: Vec<SrvTarget> = lookup
                .iter()
                .map(|srv| SrvTarget {
                    priority: srv.priority(),
                    weight: srv.weight(),
                    target: srv.target().to_ascii(),
                    port: srv.port(),
                })
                .collect();
            order_records(&mut targets);
            for target in targets {
                debug!(
                    "Attempting connection to {srv_domain} {}:{}",
                    target.target, target.port
                );
                match connect_to_host(&target.target, target.port).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => debug!("Connection to {} failed: {e}", target.target),
                }
            }
            Err(ConnectorError::AllFailed.into())
        }
        None => {
            // SRV lookup error, retry with hostname
            debug!("Attempting connection to {domain}:{fallback_port}");
            connect_to_host(domain, fallback_port).await
        }
    }
}

/// Opens a TCP connection as `config` says and wraps it in a [`Session`], with TLS
/// already running under [`TlsPolicy::Legacy`].
pub async fn connect(config: Config) -> Result<Session<TcpStream>, Error> {
    let (srv, port) = match config.tls {
        TlsPolicy::Legacy => ("_xmpps-client._tcp", 5223),
        _ => ("_xmpp-client._tcp", 5222),
    };
    let stream = match &config.server {
        ServerConfig::UseSrv => connect_with_srv(&config.domain, srv, port).await?,
        ServerConfig::Manual { host, port } => connect_to_host(host, *port).await?,
    };
    stream.set_nodelay(true)?;
    Session::new(stream, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn target(priority: u16, weight: u16, name: &str) -> SrvTarget {
        SrvTarget {
            priority,
            weight,
            target: name.to_owned(),
            port: 5222,
        }
    }

    #[test]
    fn srv_order() {
        let mut records = vec![
            target(20, 0, "backup"),
            target(10, 5, "light"),
            target(10, 60, "heavy"),
            target(5, 0, "first"),
        ];
        order_records(&mut records);
        let names: Vec<&str> = records.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(names, ["first", "heavy", "light", "backup"]);
    }

    #[tokio::test]
    async fn connects_to_ip_literal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect_to_host("127.0.0.1", port).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn manual_server_gives_plain_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut config = Config::new("example.org");
        config.server = ServerConfig::Manual {
            host: String::from("127.0.0.1"),
            port,
        };
        let session = connect(config).await.unwrap();
        assert!(!session.transport().is_secured());
        assert!(session.wants_starttls(true).unwrap());
    }
}
