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

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use common::{auth::Authenticator, sink::MtaSink, Config, Server};
use lmtp::{core::LmtpSessionManager, socketmap::SocketmapSessionManager};
use store::{spool::Spool, users::UserStore, ListStore};
use tokio::sync::watch;
use utils::{enable_tracing, listener, wait_for_shutdown, UnwrapFailure};

/// Self-hosted mailing list server: LMTP ingestion, moderation, and the
/// socketmap lookup service for the MTA. Command line flags override the
/// corresponding environment variables.
#[derive(Parser)]
#[command(name = "stalwart-lists", version)]
struct Args {
    /// Accept any credentials and record outbound mail instead of
    /// handing it to sendmail. Testing only.
    #[arg(long, env = "DUMMYMODE")]
    dummymode: bool,

    /// SMTPS port on 127.0.0.1 used for user authentication.
    #[arg(long, env = "SMTPS")]
    smtps: Option<u16>,

    /// STARTTLS port on 127.0.0.1 used for user authentication.
    #[arg(long, env = "STARTTLS")]
    starttls: Option<u16>,

    /// Email address with full administrative privileges.
    #[arg(long, env = "SUPERADMIN")]
    superadmin: Option<String>,

    /// Web UI listen spec, `ip:port` or a socket path.
    #[arg(long, env = "HTTP", default_value = "127.0.0.1:8080")]
    http: String,

    /// Canonical base URL of the web UI, used inside emails.
    #[arg(long, env = "WEBURL", default_value = "http://127.0.0.1:8080")]
    weburl: String,

    /// Hostname announced in the LMTP greeting.
    #[arg(long, env = "HOSTNAME", default_value = "localhost")]
    hostname: String,

    /// Directory with databases, the GDPR log and the spool.
    #[arg(long, env = "STATE_DIRECTORY", default_value = "/var/lib/ulist")]
    state_dir: PathBuf,

    /// Directory where the Unix sockets are created.
    #[arg(long, env = "RUNTIME_DIRECTORY", default_value = "/run/ulist")]
    runtime_dir: PathBuf,

    /// Path of the sendmail-compatible binary used to re-inject mail.
    #[arg(long, env = "SENDMAIL", default_value = "/usr/sbin/sendmail")]
    sendmail: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    enable_tracing(
        &args.log_level,
        &format!(
            "Starting Stalwart Mailing List Server v{}...",
            env!("CARGO_PKG_VERSION")
        ),
    );

    std::fs::create_dir_all(&args.state_dir).failed("Failed to create state directory");
    std::fs::create_dir_all(&args.runtime_dir).failed("Failed to create runtime directory");

    let store = ListStore::open(
        args.state_dir.join("lists.sqlite3"),
        args.state_dir.join("gdpr.log"),
    )
    .failed("Failed to open list database");
    let users =
        UserStore::open(args.state_dir.join("users.sqlite3")).failed("Failed to open user database");
    let spool = Spool::open(args.state_dir.join("spool")).failed("Failed to open spool directory");

    let mut dummy_rx = None;
    let (sink, auth) = if args.dummymode {
        let (sink, rx) = MtaSink::channel();
        dummy_rx = Some(rx);
        (sink, Authenticator::Dummy)
    } else {
        (MtaSink::sendmail(&args.sendmail), Authenticator::Sql(users))
    };

    let config = Config {
        hostname: args.hostname,
        web_url: args.weburl,
        lmtp_sock: args.runtime_dir.join("lmtp.sock"),
        socketmap_sock: args.runtime_dir.join("socketmap.sock"),
        superadmin: if args.dummymode {
            Some("test@example.com".to_string())
        } else {
            args.superadmin
        },
        dummy_mode: args.dummymode,
    };

    let server = Server::new(store, spool, sink, auth, config);

    // The web UI and the SMTPS/STARTTLS authentication transports run as
    // external collaborators against this state.
    tracing::debug!(
        context = "config",
        http = args.http,
        smtps = args.smtps,
        starttls = args.starttls,
        "External collaborator endpoints."
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .failed("Failed to start the runtime")
        .block_on(async {
            // Nothing consumes the dummy sink outside of tests; drain it
            // so recorded envelopes do not pile up.
            if let Some(mut rx) = dummy_rx.take() {
                tokio::spawn(async move { while rx.recv().await.is_some() {} });
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let lmtp_listener = listener::bind_unix(&server.config().lmtp_sock)
                .failed("Failed to bind LMTP socket");
            listener::spawn_listener(
                "lmtp",
                lmtp_listener,
                8192,
                LmtpSessionManager::new(server.clone()),
                shutdown_rx.clone(),
            );

            let socketmap_listener = listener::bind_unix(&server.config().socketmap_sock)
                .failed("Failed to bind socketmap socket");
            listener::spawn_listener(
                "socketmap",
                socketmap_listener,
                8192,
                SocketmapSessionManager::new(server.clone()),
                shutdown_rx,
            );

            wait_for_shutdown(&format!(
                "Shutting down Stalwart Mailing List Server v{}...",
                env!("CARGO_PKG_VERSION")
            ))
            .await;

            // Stop accepting, then let in-flight deliveries drain.
            shutdown_tx.send(true).ok();
            server
                .inner
                .in_flight
                .wait_idle(Duration::from_secs(30))
                .await;

            std::fs::remove_file(&server.config().lmtp_sock).ok();
            std::fs::remove_file(&server.config().socketmap_sock).ok();
        });
}
