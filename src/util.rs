use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const PULSEWATCH_BIND: &str = "PULSEWATCH_BIND";

const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

pub fn get_bind_addr() -> SocketAddr {
    let bind_from_env = std::env::var(PULSEWATCH_BIND);
    bind_from_env.map_or(DEFAULT_BIND, |res| res.parse().unwrap_or(DEFAULT_BIND))
}

const PULSEWATCH_CONFIG: &str = "PULSEWATCH_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./pulsewatch.json";

pub fn get_config_path() -> String {
    std::env::var(PULSEWATCH_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}
