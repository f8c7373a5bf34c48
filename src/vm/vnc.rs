//! Minimal RFB client: handshake, authentication and key events only.
//!
//! Enough of RFC 6143 to type into the bhyve framebuffer. Protocol versions
//! 3.3 and 3.7/3.8 are understood; security types None (1) and VNC
//! authentication (2) are supported.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::VncEndpoint;
use super::boot_command::{KeyAction, keysym};
use crate::error::BuildError;

const SECURITY_NONE: u8 = 1;
const SECURITY_VNC_AUTH: u8 = 2;
const MSG_KEY_EVENT: u8 = 4;

pub struct VncClient {
    stream: TcpStream,
}

impl VncClient {
    /// Connect and complete the handshake up to and including ServerInit.
    pub async fn connect(endpoint: &VncEndpoint) -> Result<Self> {
        let addr = format!("{}:{}", endpoint.bind_address, endpoint.port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("connecting to VNC server at {addr}"))?;
        let mut client = Self { stream };
        client.handshake(endpoint.password.as_deref()).await?;
        info!(%addr, "connected to VNC");
        Ok(client)
    }

    async fn handshake(&mut self, password: Option<&str>) -> Result<()> {
        let mut version = [0u8; 12];
        self.stream.read_exact(&mut version).await?;
        let minor = parse_version(&version)?;
        let minor = minor.min(8);
        debug!(server = %String::from_utf8_lossy(&version).trim(), minor, "RFB version");
        self.stream
            .write_all(format!("RFB 003.{minor:03}\n").as_bytes())
            .await?;

        let security = if minor >= 7 {
            let count = self.stream.read_u8().await?;
            if count == 0 {
                bail!("VNC server refused connection: {}", self.read_reason().await?);
            }
            let mut types = vec![0u8; count as usize];
            self.stream.read_exact(&mut types).await?;
            let chosen = choose_security(&types, password.is_some())?;
            self.stream.write_u8(chosen).await?;
            chosen
        } else {
            let t = self.stream.read_u32().await?;
            if t == 0 {
                bail!("VNC server refused connection: {}", self.read_reason().await?);
            }
            u8::try_from(t).context("unsupported security type")?
        };

        match security {
            SECURITY_NONE => {}
            SECURITY_VNC_AUTH => {
                let password = password.context("VNC server requires a password")?;
                let mut challenge = [0u8; 16];
                self.stream.read_exact(&mut challenge).await?;
                self.stream
                    .write_all(&auth_response(password, &challenge))
                    .await?;
            }
            other => bail!("unsupported VNC security type {other}"),
        }

        // 3.8 always sends a result; earlier versions only after VNC auth.
        if minor >= 8 || security == SECURITY_VNC_AUTH {
            if self.stream.read_u32().await? != 0 {
                let reason = if minor >= 8 {
                    self.read_reason().await?
                } else {
                    "authentication failed".to_string()
                };
                bail!("VNC authentication failed: {reason}");
            }
        }

        // ClientInit (shared), then discard ServerInit.
        self.stream.write_u8(1).await?;
        let mut server_init = [0u8; 20];
        self.stream.read_exact(&mut server_init).await?;
        let name_len = self.stream.read_u32().await?;
        let mut name = vec![0u8; name_len as usize];
        self.stream.read_exact(&mut name).await?;
        debug!(desktop = %String::from_utf8_lossy(&name), "ServerInit");
        Ok(())
    }

    async fn read_reason(&mut self) -> Result<String> {
        let len = self.stream.read_u32().await?;
        let mut buf = vec![0u8; len as usize];
        self.stream.read_exact(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub async fn key_event(&mut self, keysym: u32, down: bool) -> Result<()> {
        let mut msg = [0u8; 8];
        msg[0] = MSG_KEY_EVENT;
        msg[1] = u8::from(down);
        msg[4..].copy_from_slice(&keysym.to_be_bytes());
        self.stream.write_all(&msg).await?;
        Ok(())
    }

    async fn tap(&mut self, keysym: u32) -> Result<()> {
        self.key_event(keysym, true).await?;
        self.key_event(keysym, false).await
    }

    /// Type `actions`, pausing `interval` after every key event.
    pub async fn type_actions(
        &mut self,
        actions: &[KeyAction],
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        for action in actions {
            match *action {
                KeyAction::Tap(k) => self.tap(k).await?,
                KeyAction::ShiftedTap(k) => {
                    self.key_event(keysym::SHIFT_L, true).await?;
                    self.tap(k).await?;
                    self.key_event(keysym::SHIFT_L, false).await?;
                }
                KeyAction::Down(k) => self.key_event(k, true).await?,
                KeyAction::Up(k) => self.key_event(k, false).await?,
                KeyAction::Wait(d) => {
                    sleep_or_cancel(d, cancel).await?;
                    continue;
                }
            }
            sleep_or_cancel(interval, cancel).await?;
        }
        Ok(())
    }
}

pub(crate) async fn sleep_or_cancel(
    d: Duration,
    cancel: &CancellationToken,
) -> Result<(), BuildError> {
    tokio::select! {
        _ = tokio::time::sleep(d) => Ok(()),
        _ = cancel.cancelled() => Err(BuildError::Cancelled),
    }
}

fn parse_version(banner: &[u8; 12]) -> Result<u32> {
    let s = std::str::from_utf8(banner).context("RFB banner is not ASCII")?;
    let minor = s
        .strip_prefix("RFB 003.")
        .and_then(|rest| rest.trim_end().parse().ok())
        .with_context(|| format!("unexpected RFB banner {s:?}"))?;
    Ok(minor)
}

fn choose_security(offered: &[u8], have_password: bool) -> Result<u8> {
    if offered.contains(&SECURITY_NONE) {
        Ok(SECURITY_NONE)
    } else if have_password && offered.contains(&SECURITY_VNC_AUTH) {
        Ok(SECURITY_VNC_AUTH)
    } else {
        bail!("no supported VNC security type among {offered:?}")
    }
}

/// DES-encrypt the challenge with the password as key. VNC uses each key
/// byte with its bits reversed.
fn auth_response(password: &str, challenge: &[u8; 16]) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (k, b) in key.iter_mut().zip(password.bytes()) {
        *k = b.reverse_bits();
    }
    let cipher = Des::new(&GenericArray::from(key));

    let mut out = *challenge;
    for chunk in out.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    out
}
