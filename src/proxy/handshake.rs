//! SOCKS5 Client Handshake
//!
//! Method negotiation, RFC 1929 username/password sub-negotiation and the
//! CONNECT command (RFC 1928).

use crate::error::ProxyError;
use crate::proxy::{Credentials, ProxyTarget, TargetAddr};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

const SOCKS_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Address the proxy bound for the tunnel, as reported in its CONNECT reply
pub type BoundAddr = TargetAddr;

/// Open a TCP connection to `proxy` and establish a tunnel to `target`.
///
/// The returned stream carries raw bytes to and from `target`.
pub async fn connect(
    proxy: &ProxyTarget,
    target: &TargetAddr,
    timeout: Duration,
) -> Result<TcpStream, ProxyError> {
    let addr = proxy.authority();
    trace!(proxy = %addr, %target, "connecting to SOCKS5 proxy");

    let mut stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(ProxyError::Unreachable {
                addr,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(ProxyError::Unreachable {
                addr,
                reason: format!("no connection after {:?}", timeout),
            })
        }
    };

    let bound = tokio::time::timeout(
        timeout,
        negotiate(&mut stream, proxy.credentials.as_ref(), target),
    )
    .await
    .map_err(|_| ProxyError::Tunnel(format!("handshake with {} timed out", addr)))??;

    debug!(proxy = %addr, %target, %bound, "SOCKS5 tunnel established");
    Ok(stream)
}

/// Run the SOCKS5 handshake over an already connected stream
pub async fn negotiate<S>(
    stream: &mut S,
    credentials: Option<&Credentials>,
    target: &TargetAddr,
) -> Result<BoundAddr, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting: &[u8] = match credentials {
        Some(_) => &[SOCKS_VERSION, 2, METHOD_NO_AUTH, METHOD_USER_PASS],
        None => &[SOCKS_VERSION, 1, METHOD_NO_AUTH],
    };
    stream.write_all(greeting).await.map_err(io_error)?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(io_error)?;
    if choice[0] != SOCKS_VERSION {
        return Err(ProxyError::Protocol(format!(
            "expected SOCKS version 5, got {:#04x}",
            choice[0]
        )));
    }

    match (choice[1], credentials) {
        (METHOD_NO_AUTH, _) => {}
        (METHOD_USER_PASS, Some(creds)) => authenticate(stream, creds).await?,
        (METHOD_NONE_ACCEPTABLE, _) => return Err(ProxyError::NoAcceptableMethod),
        (method, _) => {
            return Err(ProxyError::Protocol(format!(
                "proxy selected a method that was not offered: {:#04x}",
                method
            )))
        }
    }

    stream
        .write_all(&connect_request(target)?)
        .await
        .map_err(io_error)?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.map_err(io_error)?;
    if head[0] != SOCKS_VERSION {
        return Err(ProxyError::Protocol(format!(
            "invalid SOCKS version in CONNECT reply: {:#04x}",
            head[0]
        )));
    }
    if head[1] != 0x00 {
        return Err(ProxyError::ConnectFailed {
            target: target.to_string(),
            code: head[1],
        });
    }

    read_address(stream, head[3]).await
}

async fn authenticate<S>(stream: &mut S, creds: &Credentials) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = creds.username.as_bytes();
    let password = creds.password.as_bytes();
    if username.len() > 255 || password.len() > 255 {
        return Err(ProxyError::Protocol(
            "username and password must be at most 255 bytes".to_string(),
        ));
    }

    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(AUTH_VERSION);
    request.push(username.len() as u8);
    request.extend_from_slice(username);
    request.push(password.len() as u8);
    request.extend_from_slice(password);
    stream.write_all(&request).await.map_err(io_error)?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.map_err(io_error)?;
    if reply[0] != AUTH_VERSION {
        return Err(ProxyError::Protocol(format!(
            "invalid auth sub-negotiation version: {:#04x}",
            reply[0]
        )));
    }
    if reply[1] != 0x00 {
        return Err(ProxyError::AuthRejected(reply[1]));
    }

    Ok(())
}

fn connect_request(target: &TargetAddr) -> Result<Vec<u8>, ProxyError> {
    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];

    match target {
        TargetAddr::Ip(IpAddr::V4(ip), _) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        TargetAddr::Ip(IpAddr::V6(ip), _) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        TargetAddr::Domain(domain, _) => {
            if domain.len() > 255 {
                return Err(ProxyError::Protocol(format!(
                    "domain name too long: {}",
                    domain
                )));
            }
            request.push(ATYP_DOMAIN);
            request.push(domain.len() as u8);
            request.extend_from_slice(domain.as_bytes());
        }
    }

    request.extend_from_slice(&target.port().to_be_bytes());
    Ok(request)
}

async fn read_address<S>(stream: &mut S, atyp: u8) -> Result<TargetAddr, ProxyError>
where
    S: AsyncRead + Unpin,
{
    match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await.map_err(io_error)?;
            let port = stream.read_u16().await.map_err(io_error)?;
            Ok(TargetAddr::Ip(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await.map_err(io_error)?;
            let port = stream.read_u16().await.map_err(io_error)?;
            Ok(TargetAddr::Ip(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await.map_err(io_error)? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await.map_err(io_error)?;
            let port = stream.read_u16().await.map_err(io_error)?;
            Ok(TargetAddr::Domain(
                String::from_utf8_lossy(&name).into_owned(),
                port,
            ))
        }
        other => Err(ProxyError::Protocol(format!(
            "unknown address type in reply: {:#04x}",
            other
        ))),
    }
}

fn io_error(err: io::Error) -> ProxyError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ProxyError::Protocol("proxy closed the connection during handshake".to_string())
    } else {
        ProxyError::Tunnel(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    async fn expect_bytes(server: &mut DuplexStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    fn example_target() -> TargetAddr {
        TargetAddr::Domain("example.com".to_string(), 80)
    }

    fn example_connect() -> Vec<u8> {
        let mut request = vec![0x05, 0x01, 0x00, 0x03, 11];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&[0x00, 0x50]);
        request
    }

    #[tokio::test]
    async fn test_anonymous_handshake() {
        let (mut client, mut server) = duplex(256);

        let proxy = tokio::spawn(async move {
            expect_bytes(&mut server, &[0x05, 0x01, 0x00]).await;
            server.write_all(&[0x05, 0x00]).await.unwrap();
            expect_bytes(&mut server, &example_connect()).await;
            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 10, 0, 0, 1, 0x1f, 0x90])
                .await
                .unwrap();
        });

        let bound = negotiate(&mut client, None, &example_target()).await.unwrap();
        assert_eq!(bound, (Ipv4Addr::new(10, 0, 0, 1), 8080).into());
        proxy.await.unwrap();
    }

    #[tokio::test]
    async fn test_authenticated_handshake() {
        let (mut client, mut server) = duplex(256);

        let proxy = tokio::spawn(async move {
            expect_bytes(&mut server, &[0x05, 0x02, 0x00, 0x02]).await;
            server.write_all(&[0x05, 0x02]).await.unwrap();
            expect_bytes(&mut server, b"\x01\x04user\x04pass").await;
            server.write_all(&[0x01, 0x00]).await.unwrap();
            expect_bytes(&mut server, &example_connect()).await;
            let mut reply = vec![0x05, 0x00, 0x00, 0x03, 5];
            reply.extend_from_slice(b"relay");
            reply.extend_from_slice(&[0x04, 0x38]);
            server.write_all(&reply).await.unwrap();
        });

        let creds = Credentials::new("user", "pass");
        let bound = negotiate(&mut client, Some(&creds), &example_target())
            .await
            .unwrap();
        assert_eq!(bound, TargetAddr::Domain("relay".to_string(), 1080));
        proxy.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            expect_bytes(&mut server, &[0x05, 0x02, 0x00, 0x02]).await;
            server.write_all(&[0x05, 0x02]).await.unwrap();
            let mut auth = [0u8; 14];
            server.read_exact(&mut auth).await.unwrap();
            server.write_all(&[0x01, 0x01]).await.unwrap();
        });

        let creds = Credentials::new("user", "wrongpw");
        let err = negotiate(&mut client, Some(&creds), &example_target())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::AuthRejected(0x01)));
    }

    #[tokio::test]
    async fn test_no_acceptable_method() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            expect_bytes(&mut server, &[0x05, 0x01, 0x00]).await;
            server.write_all(&[0x05, 0xff]).await.unwrap();
        });

        let err = negotiate(&mut client, None, &example_target())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NoAcceptableMethod));
    }

    #[tokio::test]
    async fn test_auth_required_without_credentials() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            expect_bytes(&mut server, &[0x05, 0x01, 0x00]).await;
            server.write_all(&[0x05, 0x02]).await.unwrap();
        });

        let err = negotiate(&mut client, None, &example_target())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            expect_bytes(&mut server, &[0x05, 0x01, 0x00]).await;
            server.write_all(&[0x05, 0x00]).await.unwrap();
            expect_bytes(&mut server, &example_connect()).await;
            server
                .write_all(&[0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let err = negotiate(&mut client, None, &example_target())
            .await
            .unwrap_err();
        match err {
            ProxyError::ConnectFailed { target, code } => {
                assert_eq!(target, "example.com:80");
                assert_eq!(code, 0x04);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_a_socks_server() {
        let (mut client, mut server) = duplex(256);

        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(b"HTTP/1.1 400 Bad Request\r\n").await.unwrap();
        });

        let err = negotiate(&mut client, None, &example_target())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_proxy_hangs_up() {
        let (mut client, server) = duplex(256);
        drop(server);

        let err = negotiate(&mut client, None, &example_target())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Protocol(_) | ProxyError::Tunnel(_)));
    }

    #[test]
    fn test_connect_request_ipv6() {
        let target = TargetAddr::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST), 443);
        let request = connect_request(&target).unwrap();

        assert_eq!(&request[..4], &[0x05, 0x01, 0x00, 0x04]);
        assert_eq!(request.len(), 4 + 16 + 2);
        assert_eq!(&request[20..], &[0x01, 0xbb]);
    }

    #[tokio::test]
    async fn test_unreachable_proxy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let proxy = ProxyTarget::new("127.0.0.1", port);
        let err = connect(&proxy, &example_target(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unreachable { .. }));
    }
}
