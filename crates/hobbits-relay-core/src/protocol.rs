use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

pub const PREAMBLE: &str = "EWP";
pub const MAX_REQUEST_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Rpc,
    Gossip,
    Ping,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Rpc => "RPC",
            Protocol::Gossip => "GOSSIP",
            Protocol::Ping => "PING",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "RPC" => Ok(Protocol::Rpc),
            "GOSSIP" => Ok(Protocol::Gossip),
            "PING" => Ok(Protocol::Ping),
            other => Err(Error::MalformedFrame(format!("unknown protocol {other:?}"))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `EWP <version> <protocol> <header-len> <body-len>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub version: String,
    pub protocol: Protocol,
    pub header_len: usize,
    pub body_len: usize,
}

impl RequestLine {
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.version.is_empty() || self.version.contains([' ', '\n']) {
            return Err(Error::MalformedFrame(format!(
                "invalid version {:?}",
                self.version
            )));
        }
        let line = format!(
            "{PREAMBLE} {} {} {} {}\n",
            self.version, self.protocol, self.header_len, self.body_len
        );
        if line.len() > MAX_REQUEST_LINE {
            return Err(Error::MalformedFrame("request line too long".into()));
        }
        Ok(line.into_bytes())
    }

    /// Parses the line without its trailing newline.
    pub fn decode(input: &[u8]) -> Result<Self> {
        let line = std::str::from_utf8(input)
            .map_err(|_| Error::MalformedFrame("request line is not valid utf-8".into()))?;
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() != 5 {
            return Err(Error::MalformedFrame(format!(
                "request line has {} fields, expected 5",
                fields.len()
            )));
        }
        if fields[0] != PREAMBLE {
            return Err(Error::MalformedFrame(format!(
                "bad preamble {:?}",
                fields[0]
            )));
        }
        if fields[1].is_empty() {
            return Err(Error::MalformedFrame("empty version".into()));
        }
        let protocol: Protocol = fields[2].parse()?;
        let header_len = parse_len(fields[3], "header")?;
        let body_len = parse_len(fields[4], "body")?;
        Ok(RequestLine {
            version: fields[1].to_string(),
            protocol,
            header_len,
            body_len,
        })
    }
}

fn parse_len(field: &str, what: &str) -> Result<usize> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::MalformedFrame(format!(
            "{what} length {field:?} is not a number"
        )));
    }
    field
        .parse()
        .map_err(|_| Error::MalformedFrame(format!("{what} length {field:?} out of range")))
}
