/*
 * Copyright (c) 2023 Stalwart Labs Ltd.
 *
 * This file is part of Stalwart Mailing List Server.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of
 * the License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 * in the LICENSE file at the top-level directory of this distribution.
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 *
 * You can be released from the requirements of the AGPLv3 license by
 * purchasing a commercial license. Please contact licensing@stalw.art
 * for more details.
*/

use std::{path::PathBuf, process::Stdio};

use tokio::{io::AsyncWriteExt, process::Command, sync::mpsc};

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    SendmailExit(Option<i32>),
    Closed,
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(err) => write!(f, "failed to run sendmail: {err}"),
            SinkError::SendmailExit(Some(code)) => {
                write!(f, "sendmail exited with status {code}")
            }
            SinkError::SendmailExit(None) => write!(f, "sendmail was terminated by a signal"),
            SinkError::Closed => write!(f, "test sink channel is closed"),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

/// An outbound envelope as recorded by the test sink.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub envelope_from: String,
    pub envelope_to: Vec<String>,
    pub message: Vec<u8>,
}

/// Hands outbound envelopes back to the MTA. The production realization
/// pipes into a local sendmail-compatible binary; the channel realization
/// records envelopes for tests and dummy mode.
#[derive(Clone)]
pub enum MtaSink {
    Sendmail { path: PathBuf },
    Channel(mpsc::UnboundedSender<SentMessage>),
}

impl MtaSink {
    pub fn sendmail(path: impl Into<PathBuf>) -> Self {
        MtaSink::Sendmail { path: path.into() }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SentMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MtaSink::Channel(tx), rx)
    }

    pub async fn send(
        &self,
        envelope_from: &str,
        envelope_to: &[String],
        message: &[u8],
    ) -> Result<(), SinkError> {
        match self {
            MtaSink::Sendmail { path } => {
                let mut child = Command::new(path)
                    .arg("-i")
                    .arg("-f")
                    // An empty reverse path (bounce) is spelled <> for
                    // sendmail.
                    .arg(if envelope_from.is_empty() {
                        "<>"
                    } else {
                        envelope_from
                    })
                    .arg("--")
                    .args(envelope_to)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()?;

                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(message).await?;
                    stdin.shutdown().await?;
                }

                let status = child.wait().await?;
                if status.success() {
                    Ok(())
                } else {
                    Err(SinkError::SendmailExit(status.code()))
                }
            }
            MtaSink::Channel(tx) => tx
                .send(SentMessage {
                    envelope_from: envelope_from.to_string(),
                    envelope_to: envelope_to.to_vec(),
                    message: message.to_vec(),
                })
                .map_err(|_| SinkError::Closed),
        }
    }
}
