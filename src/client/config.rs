//! Client configuration
//!
//! [`ClientConfig`] is the mutable, caller-facing set of options. It is
//! resolved once into a [`LinkConfig`], which the session treats as
//! read-only for its whole lifetime.

use std::fmt;
use std::ops::BitOr;
use std::time::Duration;

use bytes::Bytes;

use crate::amf::AmfValue;
use crate::error::{Error, Result};
use crate::protocol::constants::*;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// RTMP URL to connect to (scheme://host[:port]/app[/playpath])
    pub url: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Read timeout
    pub read_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Flash version string to send
    pub flash_ver: String,

    /// Outbound chunk size announced after connect
    pub chunk_size: u32,

    /// Client buffer length in milliseconds
    pub buffer_time: u32,

    /// Stream is live (play start -1000, FCSubscribe)
    pub live: bool,

    /// Answer SWF verification requests
    pub swf_verify: bool,

    /// Precomputed SWF verification response
    pub swf_verification: Option<Bytes>,

    /// Send set_playlist before play
    pub playlist: bool,

    /// Pause/unpause when the server reports an empty buffer
    pub buffer_toggle: bool,

    /// Auth string appended to connect
    pub auth: Option<String>,

    /// Stream to FCSubscribe to for live streams
    pub subscribe: Option<String>,

    /// Overrides for URL-derived values
    pub app: Option<String>,
    pub tc_url: Option<String>,
    pub swf_url: Option<String>,
    pub page_url: Option<String>,
    pub playpath: Option<String>,

    /// Start position in milliseconds
    pub seek_ms: u32,

    /// Stop position in milliseconds (0 = play to the end)
    pub stop_ms: u32,

    /// Extra arguments appended to the connect command
    pub extras: Vec<AmfValue>,

    /// Publish instead of play
    pub publish: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            tcp_nodelay: true,
            flash_ver: DEFAULT_FLASH_VER.to_string(),
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            buffer_time: DEFAULT_BUFFER_LENGTH,
            live: false,
            swf_verify: false,
            swf_verification: None,
            playlist: false,
            buffer_toggle: false,
            auth: None,
            subscribe: None,
            app: None,
            tc_url: None,
            swf_url: None,
            page_url: None,
            playpath: None,
            seek_ms: 0,
            stop_ms: 0,
            extras: Vec::new(),
            publish: false,
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Build a config from `"url key=value key=value ..."`
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let url = parts
            .next()
            .ok_or_else(|| Error::Config("empty connection string".into()))?;

        let mut config = ClientConfig::new(url);
        for part in parts {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("option without value: {}", part)))?;
            config.set_option(key, value)?;
        }
        Ok(config)
    }

    /// Set an option by its textual name
    ///
    /// Times given to `start`, `stop` and `timeout` are in seconds, `buffer`
    /// is in milliseconds. `conn` takes a typed argument: `B:0|1`, `N:num`,
    /// `S:str` or `Z:` (null).
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "app" => self.app = Some(value.to_string()),
            "tcUrl" => self.tc_url = Some(value.to_string()),
            "pageUrl" => self.page_url = Some(value.to_string()),
            "swfUrl" => self.swf_url = Some(value.to_string()),
            "flashVer" => self.flash_ver = value.to_string(),
            "playpath" => self.playpath = Some(value.to_string()),
            "playlist" => self.playlist = parse_bool(key, value)?,
            "live" => self.live = parse_bool(key, value)?,
            "subscribe" => self.subscribe = Some(value.to_string()),
            "auth" | "token" => self.auth = Some(value.to_string()),
            "swfVfy" => self.swf_verify = parse_bool(key, value)?,
            "start" => self.seek_ms = parse_number(key, value)?.saturating_mul(1000),
            "stop" => self.stop_ms = parse_number(key, value)?.saturating_mul(1000),
            "buffer" => self.buffer_time = parse_number(key, value)?,
            "timeout" => {
                let secs = parse_number(key, value)?;
                self.connect_timeout = Duration::from_secs(secs as u64);
                self.read_timeout = Duration::from_secs(secs as u64);
            }
            "conn" => self.extras.push(parse_conn_arg(value)?),
            _ => return Err(Error::Config(format!("unknown option: {}", key))),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{} expects a boolean, got {}", key, value))),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} expects a number, got {}", key, value)))
}

fn parse_conn_arg(value: &str) -> Result<AmfValue> {
    let invalid = || Error::Config(format!("invalid conn argument: {}", value));
    let (kind, body) = value.split_once(':').ok_or_else(invalid)?;

    match kind {
        "B" => match body {
            "0" => Ok(AmfValue::Boolean(false)),
            "1" => Ok(AmfValue::Boolean(true)),
            _ => Err(invalid()),
        },
        "N" => body.parse().map(AmfValue::Number).map_err(|_| invalid()),
        "S" => Ok(AmfValue::from(body)),
        "Z" => Ok(AmfValue::Null),
        _ => Err(invalid()),
    }
}

/// Protocol variant bit flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Protocol(u8);

impl Protocol {
    pub const RTMP: Protocol = Protocol(0);
    /// Tunneled over HTTP
    pub const HTTP: Protocol = Protocol(0x01);
    /// Encrypted handshake
    pub const ENCRYPTED: Protocol = Protocol(0x02);
    /// TLS transport
    pub const SSL: Protocol = Protocol(0x04);

    pub fn from_scheme(scheme: &str) -> Option<Self> {
        let protocol = match scheme.to_ascii_lowercase().as_str() {
            "rtmp" => Protocol::RTMP,
            "rtmpt" => Protocol::HTTP,
            "rtmps" => Protocol::SSL,
            "rtmpe" => Protocol::ENCRYPTED,
            "rtmpte" => Protocol::ENCRYPTED | Protocol::HTTP,
            "rtmpts" => Protocol::SSL | Protocol::HTTP,
            _ => return None,
        };
        Some(protocol)
    }

    pub fn scheme(self) -> &'static str {
        match self.0 {
            0x01 => "rtmpt",
            0x02 => "rtmpe",
            0x03 => "rtmpte",
            0x04 => "rtmps",
            0x05 => "rtmpts",
            _ => "rtmp",
        }
    }

    pub fn contains(self, other: Protocol) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn default_port(self) -> u16 {
        if self.contains(Protocol::SSL) {
            RTMPS_PORT
        } else if self.contains(Protocol::HTTP) {
            RTMPT_PORT
        } else {
            RTMP_PORT
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Protocol {
    type Output = Protocol;

    fn bitor(self, rhs: Protocol) -> Protocol {
        Protocol(self.0 | rhs.0)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Parsed RTMP URL components
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUrl {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub app: String,
    /// Normalised playpath, if the URL carries one
    pub playpath: Option<String>,
}

impl ParsedUrl {
    /// Parse `scheme://host[:port]/app[/instance][/playpath]`
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |why: &str| Error::Config(format!("invalid RTMP URL {:?}: {}", url, why));

        let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let protocol = Protocol::from_scheme(scheme).ok_or_else(|| invalid("unknown scheme"))?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };

        let (host, port) = split_host_port(authority).ok_or_else(|| invalid("bad port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.unwrap_or_else(|| protocol.default_port());

        let (app, playpath) = split_app(path);
        let playpath = playpath.filter(|p| !p.is_empty()).map(normalize_playpath);

        Ok(ParsedUrl {
            protocol,
            host: host.to_string(),
            port,
            app: app.to_string(),
            playpath,
        })
    }
}

fn split_host_port(authority: &str) -> Option<(&str, Option<u16>)> {
    // [v6addr]:port
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after.strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None if after.is_empty() => Some((host, None)),
            None => None,
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((authority, None)),
    }
}

/// Split the URL path into app and raw playpath
fn split_app(path: &str) -> (&str, Option<&str>) {
    if let Some(rest) = path.strip_prefix("ondemand/") {
        return ("ondemand", Some(rest));
    }

    let slashes: Vec<usize> = path.match_indices('/').map(|(i, _)| i).take(2).collect();
    match slashes.as_slice() {
        // app/instance/playpath...
        [_, second] => (&path[..*second], Some(&path[second + 1..])),
        [first] => (&path[..*first], Some(&path[first + 1..])),
        _ => (path, None),
    }
}

/// Apply server naming conventions to a playpath taken from a URL
///
/// `.flv` is dropped, MP4-family files get an `mp4:` prefix, `.mp3` is
/// dropped and replaced by an `mp3:` prefix. A query string is kept.
pub fn normalize_playpath(playpath: &str) -> String {
    let (base, query) = match playpath.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (playpath, None),
    };

    let lower = base.to_ascii_lowercase();
    let has_prefix = lower.starts_with("mp4:") || lower.starts_with("mp3:");

    let mut out = if lower.ends_with(".flv") {
        base[..base.len() - 4].to_string()
    } else if lower.ends_with(".mp3") {
        let stem = &base[..base.len() - 4];
        if has_prefix {
            stem.to_string()
        } else {
            format!("mp3:{}", stem)
        }
    } else if [".mp4", ".m4v", ".f4v", ".mov"]
        .iter()
        .any(|ext| lower.ends_with(ext))
        && !has_prefix
    {
        format!("mp4:{}", base)
    } else {
        base.to_string()
    };

    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// Feature flags of a link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkFlags {
    pub auth: bool,
    pub live: bool,
    pub swf_verify: bool,
    pub playlist: bool,
    pub buffer_toggle: bool,
}

/// Resolved, immutable link configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub app: String,
    pub playpath: String,
    pub tc_url: String,
    pub swf_url: Option<String>,
    pub page_url: Option<String>,
    pub flash_ver: String,
    pub auth: Option<String>,
    pub subscribe_path: Option<String>,
    pub extras: Vec<AmfValue>,
    pub flags: LinkFlags,
    pub seek_ms: u32,
    pub stop_ms: u32,
    pub buffer_time: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub tcp_nodelay: bool,
    pub chunk_size: u32,
    pub publish: bool,
    pub swf_verification: Option<Bytes>,
}

impl LinkConfig {
    /// Resolve the URL and overrides of `config`
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let parsed = ParsedUrl::parse(&config.url)?;

        let app = config.app.clone().unwrap_or(parsed.app);
        let playpath = config.playpath.clone().or(parsed.playpath).unwrap_or_default();
        let tc_url = config.tc_url.clone().unwrap_or_else(|| {
            format!("{}://{}:{}/{}", parsed.protocol, parsed.host, parsed.port, app)
        });

        if config.chunk_size == 0 || config.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!("invalid chunk size: {}", config.chunk_size)));
        }
        if config.stop_ms != 0 && config.stop_ms <= config.seek_ms {
            return Err(Error::Config("stop must be after start".into()));
        }

        Ok(LinkConfig {
            protocol: parsed.protocol,
            host: parsed.host,
            port: parsed.port,
            app,
            playpath,
            tc_url,
            swf_url: config.swf_url.clone(),
            page_url: config.page_url.clone(),
            flash_ver: config.flash_ver.clone(),
            auth: config.auth.clone(),
            subscribe_path: config.subscribe.clone(),
            extras: config.extras.clone(),
            flags: LinkFlags {
                auth: config.auth.is_some(),
                live: config.live,
                swf_verify: config.swf_verify,
                playlist: config.playlist,
                buffer_toggle: config.buffer_toggle,
            },
            seek_ms: config.seek_ms,
            stop_ms: config.stop_ms,
            buffer_time: config.buffer_time,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            tcp_nodelay: config.tcp_nodelay,
            chunk_size: config.chunk_size,
            publish: config.publish,
            swf_verification: config.swf_verification.clone(),
        })
    }
}
