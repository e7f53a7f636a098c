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

use message::addr::Addr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};

use crate::server::TestServer;

async fn query(stream: &mut UnixStream, payload: &str) -> String {
    stream
        .write_all(format!("{}:{},", payload.len(), payload).as_bytes())
        .await
        .unwrap();

    let mut reply = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        assert_ne!(stream.read(&mut byte).await.unwrap(), 0, "eof from server");
        reply.push(byte[0]);
        if byte[0] == b',' {
            break;
        }
    }

    // Strip the netstring framing.
    let text = String::from_utf8(reply).unwrap();
    let (len, rest) = text.split_once(':').unwrap();
    let payload = rest.strip_suffix(',').unwrap();
    assert_eq!(len.parse::<usize>().unwrap(), payload.len());
    payload.to_string()
}

#[tokio::test]
async fn socketmap_lookups() {
    let ts = TestServer::new("socketmap");
    ts.server
        .store()
        .create_list(&Addr::from_spec("foo@example.com").unwrap(), "Foo")
        .unwrap();

    let sock = ts.spawn_socketmap();
    let mut stream = UnixStream::connect(&sock).await.unwrap();

    let routing = format!(
        "OK lmtp:unix:{}",
        ts.server.config().lmtp_sock.display()
    );

    // Several queries over one connection.
    assert_eq!(query(&mut stream, "postfix foo@example.com").await, routing);
    // The MTA also owns the bounce channel of a list.
    assert_eq!(
        query(&mut stream, "postfix foo+bounces@example.com").await,
        routing
    );
    assert_eq!(
        query(&mut stream, "postfix FOO@EXAMPLE.COM").await,
        routing
    );
    assert_eq!(
        query(&mut stream, "postfix other@example.com").await,
        "NOTFOUND "
    );
    assert_eq!(query(&mut stream, "postfix not-an-address").await, "NOTFOUND ");
}
