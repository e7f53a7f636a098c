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
use store::{ListAction, MemberFlags};

use crate::server::{AssertResult, LmtpConnection, TestServer};

fn addr(spec: &str) -> Addr {
    Addr::from_spec(spec).unwrap()
}

fn receiver() -> MemberFlags {
    MemberFlags {
        receive: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn multi_recipient_fan_out() {
    let mut ts = TestServer::new("fan-out");
    let store = ts.server.store();
    let list = store
        .create_list(&addr("createlist@example.com"), "Created List")
        .unwrap();
    store
        .add_members(
            &list,
            &[
                addr("alice@example.com"),
                addr("bob@example.net"),
                addr("carol@example.org"),
            ],
            receiver(),
            "test",
        )
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;
    lmtp.ingest(
        "bob@example.net",
        &["createlist@example.com"],
        concat!(
            "From: bob@example.net\r\n",
            "To: createlist@example.com\r\n",
            "Subject: Hi\r\n",
            "\r\n",
            "Hello World"
        ),
    )
    .await
    .assert_contains("250 2.0.0 OK");
    lmtp.quit().await;

    // Exactly one outbound envelope, addressed to all receivers sorted by
    // address, with the list's bounce channel as reverse path.
    let sent = ts.sent_message();
    ts.assert_no_messages();
    assert_eq!(sent.envelope_from, "createlist+bounces@example.com");
    assert_eq!(
        sent.envelope_to,
        ["alice@example.com", "bob@example.net", "carol@example.org"]
    );

    let copy = String::from_utf8(sent.message).unwrap();
    let lines: Vec<&str> = copy.split("\r\n").collect();
    assert_eq!(
        lines[0],
        "From: \"bob via Created List\" <createlist@example.com>"
    );
    assert_eq!(lines[1], "List-Id: \"Created List\" <createlist@example.com>");
    assert_eq!(lines[2], "List-Post: <mailto:createlist@example.com>");
    assert_eq!(
        lines[3],
        "List-Unsubscribe: <https://lists.example.com/leave/createlist%40example.com>"
    );
    assert!(lines[4].starts_with("Message-Id: <") && lines[4].ends_with("@example.com>"));
    assert_eq!(lines[5], "Reply-To: <bob@example.net>");
    assert_eq!(lines[6], "Subject: [Created List] Hi");
    assert_eq!(lines[7], "To: createlist@example.com");
    assert_eq!(lines[8], "");
    assert!(copy.contains("Hello World"));
    assert!(copy.contains(
        "----\r\nYou can leave the mailing list \"Created List\" here: \
         https://lists.example.com/leave/createlist%40example.com"
    ));
}

#[tokio::test]
async fn bounce_routing() {
    let mut ts = TestServer::new("bounce");
    let store = ts.server.store();
    let list = store.create_list(&addr("foo@example.com"), "Foo").unwrap();
    store
        .add_members(
            &list,
            &[addr("boss@example.com")],
            MemberFlags {
                bounces: true,
                ..Default::default()
            },
            "test",
        )
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;

    // Non-empty reverse path to the bounce channel.
    lmtp.ingest(
        "someone@example.net",
        &["foo+bounces@example.com"],
        "From: someone@example.net\r\nTo: foo@example.com\r\nSubject: x\r\n\r\nbody",
    )
    .await
    .assert_contains(
        "bounce address accepts only bounce notifications (with empty envelope-from)",
    );

    // Empty reverse path to the list address proper.
    lmtp.rset().await;
    lmtp.ingest(
        "",
        &["foo@example.com"],
        "From: mailer-daemon@example.net\r\nTo: foo@example.com\r\nSubject: failure\r\n\r\nbody",
    )
    .await
    .assert_contains("got bounce notification (with empty envelope-from) to non-bounce address");
    ts.assert_no_messages();

    // A real bounce is forwarded, unchanged, to the bounce receivers.
    lmtp.rset().await;
    lmtp.ingest(
        "",
        &["foo+bounces@example.com"],
        "From: mailer-daemon@example.net\r\nTo: foo+bounces@example.com\r\nSubject: failure\r\n\r\ndelivery failed",
    )
    .await
    .assert_contains("250 2.0.0 OK");
    lmtp.quit().await;

    let sent = ts.sent_message();
    assert_eq!(sent.envelope_from, "");
    assert_eq!(sent.envelope_to, ["boss@example.com"]);
    let raw = String::from_utf8(sent.message).unwrap();
    assert!(raw.contains("delivery failed"));
    // Bounce notifications are not rewritten.
    assert!(!raw.contains("List-Id"));
}

#[tokio::test]
async fn blind_copy_is_rejected() {
    let mut ts = TestServer::new("cc-bcc");
    let store = ts.server.store();
    let list = store.create_list(&addr("list@example.com"), "List").unwrap();
    store
        .add_members(&list, &[addr("alice@example.com")], receiver(), "test")
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;

    lmtp.ingest(
        "alice@example.com",
        &["list@example.com"],
        concat!(
            "From: alice@example.com\r\n",
            "To: foo@example.com\r\n",
            "Cc: bar@example.com\r\n",
            "Subject: secret\r\n",
            "\r\n",
            "body"
        ),
    )
    .await
    .assert_contains("list address list@example.com is not in To or Cc");
    ts.assert_no_messages();

    lmtp.rset().await;
    lmtp.ingest(
        "alice@example.com",
        &["list@example.com"],
        concat!(
            "From: alice@example.com\r\n",
            "To: foo@example.com\r\n",
            "Cc: bar@example.com, list@example.com\r\n",
            "Subject: not secret\r\n",
            "\r\n",
            "body"
        ),
    )
    .await
    .assert_contains("250 2.0.0 OK");
    lmtp.quit().await;

    let sent = ts.sent_message();
    assert_eq!(sent.envelope_to, ["alice@example.com"]);
}

#[tokio::test]
async fn spam_flag_forces_moderation() {
    let mut ts = TestServer::new("spam");
    let store = ts.server.store();
    let list = store.create_list(&addr("team@example.com"), "Team").unwrap();
    store
        .add_members(&list, &[addr("bob@example.net")], receiver(), "test")
        .unwrap();
    store
        .add_members(
            &list,
            &[addr("nora@example.com")],
            MemberFlags {
                notify: true,
                ..Default::default()
            },
            "test",
        )
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;
    // A member whose action would be Pass is still held when the spam
    // filter flagged the message.
    lmtp.ingest(
        "bob@example.net",
        &["team@example.com"],
        concat!(
            "From: bob@example.net\r\n",
            "To: team@example.com\r\n",
            "Subject: great offer\r\n",
            "X-Spam-Status: Yes, score=12.0 required=5.0\r\n",
            "\r\n",
            "body"
        ),
    )
    .await
    .assert_contains("250 2.0.0 OK");
    lmtp.quit().await;

    assert_eq!(ts.server.spool().list(&list).unwrap().len(), 1);

    // Only the moderation alert went out, to the notify members.
    let sent = ts.sent_message();
    ts.assert_no_messages();
    assert_eq!(sent.envelope_to, ["nora@example.com"]);
    assert!(String::from_utf8(sent.message)
        .unwrap()
        .contains("waiting for moderation"));
}

#[tokio::test]
async fn fan_out_copy_is_loop_rejected() {
    let mut ts = TestServer::new("loop");
    let store = ts.server.store();
    let list = store
        .create_list(&addr("createlist@example.com"), "Created List")
        .unwrap();
    store
        .add_members(&list, &[addr("alice@example.com")], receiver(), "test")
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;
    lmtp.ingest(
        "bob@example.net",
        &["createlist@example.com"],
        "From: bob@example.net\r\nTo: createlist@example.com\r\nSubject: Hi\r\n\r\nHello",
    )
    .await
    .assert_contains("250 2.0.0 OK");

    let copy = String::from_utf8(ts.sent_message().message).unwrap();

    // Re-feeding the outbound copy trips loop detection via its List-Id.
    lmtp.rset().await;
    lmtp.ingest("bob@example.net", &["createlist@example.com"], &copy)
        .await
        .assert_contains("email loop detected: createlist@example.com");
    lmtp.quit().await;
    ts.assert_no_messages();
}

#[tokio::test]
async fn all_reject_rejects_every_class() {
    let mut ts = TestServer::new("all-reject");
    let store = ts.server.store();
    let mut list = store.create_list(&addr("closed@example.com"), "Closed").unwrap();
    store
        .update_list(
            &mut list,
            "Closed",
            false,
            false,
            ListAction::Reject,
            ListAction::Reject,
            ListAction::Reject,
            ListAction::Reject,
        )
        .unwrap();
    store
        .add_members(
            &list,
            &[addr("mod@example.com")],
            MemberFlags {
                receive: true,
                moderate: true,
                ..Default::default()
            },
            "test",
        )
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;
    // Even the moderator is turned away.
    lmtp.ingest(
        "mod@example.com",
        &["closed@example.com"],
        "From: mod@example.com\r\nTo: closed@example.com\r\nSubject: Hi\r\n\r\nbody",
    )
    .await
    .assert_contains("550 5.1.1 user not found");
    lmtp.quit().await;
    ts.assert_no_messages();
}

#[tokio::test]
async fn join_command_sends_checkback() {
    let mut ts = TestServer::new("join-cmd");
    let store = ts.server.store();
    let mut list = store
        .create_list(&addr("public@example.com"), "Public")
        .unwrap();
    store
        .update_list(
            &mut list,
            "Public",
            true,
            false,
            ListAction::Pass,
            ListAction::Pass,
            ListAction::Pass,
            ListAction::Mod,
        )
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;
    lmtp.ingest(
        "bob@example.com",
        &["public@example.com"],
        "From: bob@example.com\r\nTo: public@example.com\r\nSubject: join\r\n\r\n",
    )
    .await
    .assert_contains("250 2.0.0 OK");
    lmtp.quit().await;

    let sent = ts.sent_message();
    ts.assert_no_messages();
    assert_eq!(sent.envelope_from, "public+bounces@example.com");
    assert_eq!(sent.envelope_to, ["bob@example.com"]);
    let mail = String::from_utf8(sent.message).unwrap();
    assert!(mail.contains("https://lists.example.com/join/public%40example.com/"));
    assert!(mail.contains("/bob%40example.com"));
    // Nothing was distributed and nothing was spooled.
    assert_eq!(ts.server.spool().list(&list).unwrap().len(), 0);
}

#[tokio::test]
async fn join_command_on_private_list_is_silent() {
    let mut ts = TestServer::new("join-private");
    let store = ts.server.store();
    store
        .create_list(&addr("private@example.com"), "Private")
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;
    lmtp.ingest(
        "bob@example.com",
        &["private@example.com"],
        "From: bob@example.com\r\nTo: private@example.com\r\nSubject: join\r\n\r\n",
    )
    .await
    .assert_contains("250 2.0.0 OK");
    lmtp.quit().await;
    ts.assert_no_messages();
}

#[tokio::test]
async fn leave_command_checks_membership() {
    let mut ts = TestServer::new("leave-cmd");
    let store = ts.server.store();
    let list = store
        .create_list(&addr("public@example.com"), "Public")
        .unwrap();
    store
        .add_members(&list, &[addr("bob@example.com")], receiver(), "test")
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;

    // Members get a leave checkback mail.
    lmtp.ingest(
        "bob@example.com",
        &["public@example.com"],
        "From: bob@example.com\r\nTo: public@example.com\r\nSubject: leave\r\n\r\n",
    )
    .await
    .assert_contains("250 2.0.0 OK");
    let sent = ts.sent_message();
    assert_eq!(sent.envelope_to, ["bob@example.com"]);
    assert!(String::from_utf8(sent.message)
        .unwrap()
        .contains("https://lists.example.com/leave/public%40example.com/"));

    // Strangers get the same reply and no mail; nothing is revealed.
    lmtp.rset().await;
    lmtp.ingest(
        "eve@example.com",
        &["public@example.com"],
        "From: eve@example.com\r\nTo: public@example.com\r\nSubject: leave\r\n\r\n",
    )
    .await
    .assert_contains("250 2.0.0 OK");
    lmtp.quit().await;
    ts.assert_no_messages();
}

#[tokio::test]
async fn unknown_recipient_and_per_recipient_status() {
    let mut ts = TestServer::new("multi-status");
    let store = ts.server.store();
    let list = store.create_list(&addr("a@example.com"), "A").unwrap();
    let mut closed = store.create_list(&addr("b@example.com"), "B").unwrap();
    store
        .update_list(
            &mut closed,
            "B",
            false,
            false,
            ListAction::Reject,
            ListAction::Reject,
            ListAction::Reject,
            ListAction::Reject,
        )
        .unwrap();
    store
        .add_members(&list, &[addr("alice@example.com")], receiver(), "test")
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;

    // Unknown lists are rejected at RCPT time.
    lmtp.mail_from("x@example.net", 2).await;
    lmtp.rcpt_to("nobody@example.com", 5)
        .await
        .assert_contains("user not found");

    // One DATA, one status line per accepted recipient, in RCPT order:
    // delivery to list a succeeds while list b rejects the sender.
    lmtp.rcpt_to("a@example.com", 2).await;
    lmtp.rcpt_to("b@example.com", 2).await;
    lmtp.data(3).await;
    let responses = lmtp
        .data_bytes(
            concat!(
                "From: x@example.net\r\n",
                "To: a@example.com\r\n",
                "Cc: b@example.com\r\n",
                "Subject: Hi\r\n",
                "\r\n",
                "body"
            ),
            2,
            u8::MAX,
        )
        .await;
    assert_eq!(responses.len(), 2);
    // List a holds unknown senders for moderation by default.
    assert!(responses[0].starts_with("250"));
    assert!(responses[1].starts_with("550"));
    lmtp.quit().await;

    assert_eq!(ts.server.spool().list(&list).unwrap().len(), 1);
}

#[tokio::test]
async fn moderated_mail_can_be_forwarded() {
    let mut ts = TestServer::new("forward");
    let store = ts.server.store();
    let list = store.create_list(&addr("queue@example.com"), "Queue").unwrap();
    store
        .add_members(&list, &[addr("alice@example.com")], receiver(), "test")
        .unwrap();

    let sock = ts.spawn_lmtp();
    let mut lmtp = LmtpConnection::connect(&sock).await;
    lmtp.lhlo().await;
    // Unknown sender, default action is moderation.
    lmtp.ingest(
        "stranger@example.net",
        &["queue@example.com"],
        "From: stranger@example.net\r\nTo: queue@example.com\r\nSubject: Hello\r\n\r\nplease post",
    )
    .await
    .assert_contains("250 2.0.0 OK");
    lmtp.quit().await;

    let held = ts.server.held_page(&list, 1).unwrap();
    assert_eq!(held.len(), 1);
    let summary = ts.server.read_header(&list, &held[0]).unwrap();
    assert_eq!(summary.from.as_deref(), Some("stranger@example.net"));
    assert_eq!(summary.subject, "Hello");

    // Moderator approves: the message is distributed and dequeued.
    ts.server.forward(&list, &held[0]).await.unwrap();
    assert_eq!(ts.server.spool().list(&list).unwrap().len(), 0);

    let sent = ts.sent_message();
    assert_eq!(sent.envelope_from, "queue+bounces@example.com");
    assert_eq!(sent.envelope_to, ["alice@example.com"]);
    let parsed = mail_parser::MessageParser::new()
        .parse(&sent.message[..])
        .unwrap();
    assert_eq!(parsed.subject(), Some("[Queue] Hello"));
}
