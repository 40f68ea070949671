//! Wire messages for the container lifecycle RPC, plus the length-prefixed
//! framing used to send and receive them over a `UnixStream`.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdMapEntryWire {
    pub first: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    PreRegister {
        id: String,
    },
    Register {
        id: String,
        init_pid: i32,
        ctime_unix: i64,
        uid_first: u32,
        uid_size: u32,
        gid_first: u32,
        gid_size: u32,
        ro_paths: Vec<String>,
        masked_paths: Vec<String>,
    },
    Update {
        id: String,
        ctime_unix: i64,
        uid_first: u32,
        uid_size: u32,
        gid_first: u32,
        gid_size: u32,
        ro_paths: Vec<String>,
        masked_paths: Vec<String>,
    },
    Unregister {
        id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub status: StatusCode,
    pub message: Option<String>,
}

impl RpcResponse {
    pub fn ok() -> Self {
        Self {
            status: StatusCode::Ok,
            message: None,
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

pub fn write_framed<T: Serialize, W: Write>(writer: &mut W, message: &T) -> std::io::Result<()> {
    let payload = serde_json::to_vec(message)?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()
}

pub fn read_framed<T: for<'de> Deserialize<'de>, R: Read>(reader: &mut R) -> std::io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    serde_json::from_slice(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn request_round_trips_through_framing() {
        let req = RpcRequest::PreRegister { id: "c1".into() };
        let mut buf = Vec::new();
        write_framed(&mut buf, &req).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: RpcRequest = read_framed(&mut cursor).unwrap();
        match decoded {
            RpcRequest::PreRegister { id } => assert_eq!(id, "c1"),
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
