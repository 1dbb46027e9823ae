use std::io::{Error, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub listen_ip: IpAddr,
    pub tcp_nodelay: bool,
    pub tcp_keepalive: Option<Duration>,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            tcp_nodelay: true,
            tcp_keepalive: Some(Duration::from_secs(30)),
        }
    }
}

impl ListenerSettings {
    /// Socket address for a tenant port string
    pub fn bind_addr(&self, port: &str) -> Result<SocketAddr, Error> {
        let port: u16 = port.trim().parse().map_err(|e| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("invalid tenant port {:?}: {}", port, e),
            )
        })?;
        Ok(SocketAddr::new(self.listen_ip, port))
    }
}

/// A bound tenant port
pub struct TenantListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
}

impl TenantListener {
    pub async fn bind(settings: &ListenerSettings, port: &str) -> Result<Self, Error> {
        let addr = settings.bind_addr(port)?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            tcp_nodelay: settings.tcp_nodelay,
            tcp_keepalive: settings.tcp_keepalive,
        })
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), Error> {
        let (stream, addr) = self.listener.accept().await?;

        if self.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        if let Some(keepalive) = self.tcp_keepalive {
            let sock_ref = socket2::SockRef::from(&stream);
            let keepalive = socket2::TcpKeepalive::new().with_time(keepalive);
            sock_ref.set_tcp_keepalive(&keepalive)?;
        }

        Ok((stream, addr))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
