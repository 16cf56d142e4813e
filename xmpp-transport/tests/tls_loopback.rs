use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::SupportedProtocolVersion;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use xmpp_transport::sasl::{ChannelBinding, Credentials, MechanismKind};
use xmpp_transport::{
    BindingType, Config, Error, PasswordCache, Session, TlsConfig, TlsState, Transport,
    TransportKind,
};

const BULK: usize = 256 * 1024;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn server_config(
    versions: &[&'static SupportedProtocolVersion],
) -> (CertificateDer<'static>, Arc<rustls::ServerConfig>) {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec!["localhost".to_owned()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let der = cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(versions)
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![der.clone()], key)
    .unwrap();
    (der, Arc::new(config))
}

/// What the server saw: its exporter value and the bulk data it received.
struct ServerReport {
    exporter: Vec<u8>,
    bulk: Vec<u8>,
}

/// Accepts one TLS client, answers "ping" with "pong", then reads `BULK` bytes.
async fn serve(config: Arc<rustls::ServerConfig>) -> (u16, JoinHandle<Option<ServerReport>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = TlsAcceptor::from(config);
    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.ok()?;
        let exporter = tls
            .get_ref()
            .1
            .export_keying_material(vec![0u8; 32], b"EXPORTER-Channel-Binding", None)
            .ok()?;
        // Clients that hang up early simply end the exchange.
        let mut ping = [0u8; 4];
        tls.read_exact(&mut ping).await.ok()?;
        assert_eq!(&ping, b"ping");
        tls.write_all(b"pong").await.ok()?;
        tls.flush().await.ok()?;
        let mut bulk = vec![0u8; BULK];
        tls.read_exact(&mut bulk).await.ok()?;
        Some(ServerReport { exporter, bulk })
    });
    (port, handle)
}

async fn write_all(transport: &mut Transport<TcpStream>, mut data: &[u8]) {
    while !data.is_empty() {
        match transport.write(data) {
            Ok(n) => data = &data[n..],
            Err(e) if Transport::<TcpStream>::is_recoverable(&e) => {
                transport.writable().await.unwrap()
            }
            Err(e) => panic!("write failed: {e}"),
        }
        assert_eq!(transport.kind(), TransportKind::Secured);
    }
    loop {
        match transport.clear_pending_write() {
            Ok(()) => break,
            Err(e) if Transport::<TcpStream>::is_recoverable(&e) => {
                transport.writable().await.unwrap()
            }
            Err(e) => panic!("flush failed: {e}"),
        }
    }
}

async fn read_exact(transport: &mut Transport<TcpStream>, buf: &mut [u8]) {
    let mut filled = 0;
    while filled < buf.len() {
        match transport.read(&mut buf[filled..]) {
            Ok(0) => panic!("unexpected end of stream"),
            Ok(n) => filled += n,
            Err(e) if Transport::<TcpStream>::is_recoverable(&e) => {
                transport.readable().await.unwrap()
            }
            Err(e) => panic!("read failed: {e}"),
        }
        assert_eq!(transport.kind(), TransportKind::Secured);
    }
}

fn trusting(cert: CertificateDer<'static>) -> TlsConfig {
    TlsConfig::builder()
        .add_root_certificate(cert)
        .build()
        .unwrap()
}

#[tokio::test]
async fn starttls_tls13() {
    init_logger();
    let (cert, config) = server_config(&[&rustls::version::TLS13]);
    let (port, server) = serve(config).await;

    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut transport = Transport::plain(tcp);
    assert_eq!(transport.kind(), TransportKind::Plain);
    let mut passwords = PasswordCache::default();
    transport
        .start_tls(&trusting(cert.clone()), "localhost", &mut passwords)
        .await
        .unwrap();

    assert_eq!(transport.kind(), TransportKind::Secured);
    let tls = transport.tls().unwrap();
    assert_eq!(tls.state(), TlsState::Established);
    assert_eq!(tls.protocol_version(), Some(rustls::ProtocolVersion::TLSv1_3));
    assert_eq!(tls.binding_type(), Some(BindingType::TlsExporter));
    let peer = transport.peer_certificate().unwrap();
    assert_eq!(peer.dns_names(), &["localhost".to_owned()]);
    assert_eq!(peer.der(), cert.as_ref());

    write_all(&mut transport, b"ping").await;
    let mut pong = [0u8; 2];
    read_exact(&mut transport, &mut pong).await;
    assert_eq!(&pong, b"po");
    assert_eq!(transport.pending(), 2);
    read_exact(&mut transport, &mut pong).await;
    assert_eq!(&pong, b"ng");
    assert_eq!(transport.pending(), 0);

    let bulk: Vec<u8> = (0..BULK).map(|i| (i % 251) as u8).collect();
    write_all(&mut transport, &bulk).await;

    let report = server.await.unwrap().unwrap();
    assert_eq!(report.bulk, bulk);
    assert_eq!(
        transport.channel_binding(),
        ChannelBinding::TlsExporter(report.exporter)
    );

    // A second upgrade is refused and leaves TLS in place.
    let res = transport
        .start_tls(&trusting(cert), "localhost", &mut passwords)
        .await;
    assert!(matches!(res, Err(Error::InvalidState(_))));
    assert_eq!(transport.kind(), TransportKind::Secured);

    transport.close().await;
    assert_eq!(transport.kind(), TransportKind::Closed);
}

#[tokio::test]
async fn tls12_uses_server_end_point() {
    init_logger();
    let (cert, config) = server_config(&[&rustls::version::TLS12]);
    let (port, _server) = serve(config).await;

    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut passwords = PasswordCache::default();
    let transport = Transport::secured(tcp, &trusting(cert.clone()), "localhost", &mut passwords)
        .await
        .unwrap();

    let tls = transport.tls().unwrap();
    assert_eq!(tls.protocol_version(), Some(rustls::ProtocolVersion::TLSv1_2));
    assert_eq!(tls.binding_type(), Some(BindingType::TlsServerEndPoint));
    assert_eq!(
        transport.channel_binding(),
        ChannelBinding::TlsServerEndPoint(Sha256::digest(&cert).to_vec())
    );
}

#[tokio::test]
async fn untrusted_certificate_fails() {
    init_logger();
    let (_, config) = server_config(&[&rustls::version::TLS13]);
    let (port, _server) = serve(config).await;

    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut transport = Transport::plain(tcp);
    let mut passwords = PasswordCache::default();
    let res = transport
        .start_tls(&TlsConfig::default(), "localhost", &mut passwords)
        .await;
    assert!(matches!(res, Err(Error::Tls(_))));
    assert_eq!(transport.kind(), TransportKind::Closed);
}

#[tokio::test]
async fn failure_handler_can_accept() {
    init_logger();
    let (_, config) = server_config(&[&rustls::version::TLS13]);
    let (port, _server) = serve(config).await;

    let tls_config = TlsConfig::builder()
        .cert_fail_handler(|cert, _reason| cert.dns_name(0) == Some("localhost"))
        .build()
        .unwrap();
    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut transport = Transport::plain(tcp);
    let mut passwords = PasswordCache::default();
    transport
        .start_tls(&tls_config, "localhost", &mut passwords)
        .await
        .unwrap();
    assert!(transport.is_secured());
}

#[tokio::test]
async fn session_binds_scram_to_tls() {
    init_logger();
    let (cert, config) = server_config(&[&rustls::version::TLS13]);
    let (port, _server) = serve(config).await;

    let mut config = Config::new("localhost");
    config.tls_config = trusting(cert);
    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut session = Session::new(tcp, config).await.unwrap();
    assert!(session.wants_starttls(true).unwrap());
    session.start_tls().await.unwrap();
    assert!(!session.wants_starttls(true).unwrap());

    let creds = Credentials::default()
        .with_username("user")
        .with_password("pencil");
    let offered = ["PLAIN", "SCRAM-SHA-256", "SCRAM-SHA-256-PLUS"];
    let (kind, initial) = session.auth_start(&offered, creds).unwrap();
    assert_eq!(kind, MechanismKind::ScramSha256Plus);
    assert!(initial.starts_with(b"p=tls-exporter,,n=user,r="));
}
