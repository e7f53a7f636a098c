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

use crate::server::TestServer;

fn addr(spec: &str) -> Addr {
    Addr::from_spec(spec).unwrap()
}

fn member_flags() -> MemberFlags {
    MemberFlags {
        receive: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn list_lifecycle() {
    let ts = TestServer::new("list-lifecycle");
    let store = ts.server.store();

    let mut list = store
        .create_list(&addr("announce@example.com"), "Announcements")
        .unwrap();
    assert_eq!(list.addr_spec(), "announce@example.com");
    assert_eq!(list.bounce_spec(), "announce+bounces@example.com");
    assert_eq!(list.hmac_key.len(), 32);
    assert!(list.hmac_key.iter().any(|&b| b != 0));
    assert_eq!(list.action_mod, ListAction::Pass);
    assert_eq!(list.action_member, ListAction::Pass);
    assert_eq!(list.action_known, ListAction::Pass);
    assert_eq!(list.action_unknown, ListAction::Mod);
    assert!(!list.public_signup);

    // Missing lists are None, not an error.
    assert!(store.get_list(&addr("missing@example.com")).unwrap().is_none());
    assert!(store.is_list(&addr("announce@example.com")).unwrap());

    // The reserved bounce suffix cannot be a list address.
    assert!(store
        .create_list(&addr("foo+bounces@example.com"), "Nope")
        .is_err());

    // Update writes the database and the snapshot.
    store
        .update_list(
            &mut list,
            "Announce v2",
            true,
            false,
            ListAction::Reject,
            ListAction::Pass,
            ListAction::Mod,
            ListAction::Reject,
        )
        .unwrap();
    assert_eq!(list.display, "Announce v2");
    assert!(list.public_signup);
    let reloaded = store
        .get_list(&addr("announce@example.com"))
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.display, "Announce v2");
    assert_eq!(reloaded.action_mod, ListAction::Reject);
    assert_eq!(reloaded.action_known, ListAction::Mod);
    // HMAC keys never change after creation.
    assert_eq!(reloaded.hmac_key, list.hmac_key);

    // Delete removes members and knowns along with the list row.
    store
        .add_members(&reloaded, &[addr("a@example.org")], member_flags(), "test")
        .unwrap();
    store
        .add_knowns(&reloaded, &[addr("k@example.org")])
        .unwrap();
    store.delete_list(reloaded).unwrap();
    assert!(store.get_list(&addr("announce@example.com")).unwrap().is_none());
}

#[tokio::test]
async fn list_ordering() {
    let ts = TestServer::new("list-ordering");
    let store = ts.server.store();

    for spec in ["b@zzz.org", "a@zzz.org", "x@aaa.org"] {
        store.create_list(&addr(spec), "").unwrap();
    }
    let lists: Vec<String> = store
        .all_lists()
        .unwrap()
        .iter()
        .map(|l| l.addr_spec())
        .collect();
    assert_eq!(lists, ["x@aaa.org", "a@zzz.org", "b@zzz.org"]);
}

#[tokio::test]
async fn membership_batches() {
    let ts = TestServer::new("membership-batches");
    let store = ts.server.store();
    let list = store
        .create_list(&addr("team@example.com"), "Team")
        .unwrap();

    let added = store
        .add_members(
            &list,
            &[
                addr("carol@example.org"),
                addr("alice@example.com"),
                // The list's own address is silently skipped.
                addr("team@example.com"),
                addr("bob@example.net"),
            ],
            member_flags(),
            "seeded by test",
        )
        .unwrap();
    assert_eq!(
        added.iter().map(Addr::addr_spec).collect::<Vec<_>>(),
        ["carol@example.org", "alice@example.com", "bob@example.net"]
    );

    // Adding an existing member is a no-op for that address.
    let added = store
        .add_members(
            &list,
            &[addr("alice@example.com"), addr("dave@example.com")],
            member_flags(),
            "second batch",
        )
        .unwrap();
    assert_eq!(
        added.iter().map(Addr::addr_spec).collect::<Vec<_>>(),
        ["dave@example.com"]
    );

    // At most one membership row per address.
    let members = store.members(&list).unwrap();
    assert_eq!(members.len(), 4);
    // Listing order is deterministic, by address.
    assert_eq!(
        members.iter().map(|m| m.addr.addr_spec()).collect::<Vec<_>>(),
        [
            "alice@example.com",
            "bob@example.net",
            "carol@example.org",
            "dave@example.com"
        ]
    );

    // Receivers come back sorted as well, which pins fan-out order.
    assert_eq!(
        store
            .receivers(&list)
            .unwrap()
            .iter()
            .map(Addr::addr_spec)
            .collect::<Vec<_>>(),
        [
            "alice@example.com",
            "bob@example.net",
            "carol@example.org",
            "dave@example.com"
        ]
    );

    // Removing a non-member is a no-op for that address.
    let removed = store
        .remove_members(
            &list,
            &[addr("alice@example.com"), addr("stranger@example.com")],
            "cleanup",
        )
        .unwrap();
    assert_eq!(
        removed.iter().map(Addr::addr_spec).collect::<Vec<_>>(),
        ["alice@example.com"]
    );
    assert!(!store.is_member(&list, &addr("alice@example.com")).unwrap());
}

#[tokio::test]
async fn member_flags_and_lookups() {
    let ts = TestServer::new("member-flags");
    let store = ts.server.store();
    let list = store.create_list(&addr("ops@example.com"), "Ops").unwrap();

    store
        .add_members(
            &list,
            &[addr("admin@example.com")],
            MemberFlags {
                receive: false,
                moderate: true,
                notify: true,
                admin: true,
                bounces: true,
            },
            "test",
        )
        .unwrap();
    store
        .add_members(&list, &[addr("user@example.com")], member_flags(), "test")
        .unwrap();

    assert_eq!(store.admins(&list).unwrap().len(), 1);
    assert_eq!(store.notifieds(&list).unwrap().len(), 1);
    assert_eq!(store.bounce_receivers(&list).unwrap().len(), 1);
    assert_eq!(store.receivers(&list).unwrap().len(), 1);

    let membership = store
        .get_membership(&list, &addr("admin@example.com"))
        .unwrap()
        .unwrap();
    assert!(membership.moderate && membership.notify && membership.admin && membership.bounces);
    assert!(!membership.receive);

    store
        .update_member(&list, &addr("user@example.com"), MemberFlags {
            receive: true,
            notify: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(store.notifieds(&list).unwrap().len(), 2);

    let memberships = store.memberships(&addr("user@example.com")).unwrap();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].0.addr_spec(), "ops@example.com");
    assert!(memberships[0].1.notify);
}

#[tokio::test]
async fn knowns() {
    let ts = TestServer::new("knowns");
    let store = ts.server.store();
    let list = store.create_list(&addr("dev@example.com"), "Dev").unwrap();

    let added = store
        .add_knowns(
            &list,
            &[
                addr("zed@example.org"),
                addr("ann@example.org"),
                addr("dev@example.com"),
                addr("zed@example.org"),
            ],
        )
        .unwrap();
    assert_eq!(added.len(), 2);
    assert!(store.is_known(&list, &addr("ann@example.org")).unwrap());
    assert_eq!(
        store
            .knowns(&list)
            .unwrap()
            .iter()
            .map(Addr::addr_spec)
            .collect::<Vec<_>>(),
        ["ann@example.org", "zed@example.org"]
    );

    let removed = store
        .remove_knowns(&list, &[addr("ann@example.org"), addr("none@example.org")])
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert!(!store.is_known(&list, &addr("ann@example.org")).unwrap());
}

#[tokio::test]
async fn gdpr_log_lines() {
    let ts = TestServer::new("gdpr-log");
    let store = ts.server.store();
    let list = store
        .create_list(&addr("public@example.com"), "Public")
        .unwrap();

    let added = store
        .add_members(
            &list,
            &[
                addr("bob@example.com"),
                addr("public@example.com"),
                addr("bob@example.com"),
                addr("eve@example.com"),
            ],
            member_flags(),
            "user confirmed in web ui",
        )
        .unwrap();
    assert_eq!(added.len(), 2);

    let log = ts.gdpr_log();
    // One line per address actually added.
    assert_eq!(log.lines().count(), 2);
    assert!(log.contains(
        "bob@example.com joined the list public@example.com, reason: user confirmed in web ui"
    ));

    store
        .remove_members(&list, &[addr("bob@example.com")], "user clicked leave link")
        .unwrap();
    let log = ts.gdpr_log();
    assert_eq!(log.lines().count(), 3);
    assert!(log
        .contains("bob@example.com left the list public@example.com, reason: user clicked leave link"));
}

#[tokio::test]
async fn spool_ordering_and_traversal() {
    let ts = TestServer::new("spool");
    let store = ts.server.store();
    let spool = ts.server.spool();
    let list = store.create_list(&addr("mod@example.com"), "Mod").unwrap();

    let first = spool.put(&list, b"From: a@example.com\r\n\r\none").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = spool.put(&list, b"From: b@example.com\r\n\r\ntwo").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let third = spool.put(&list, b"From: c@example.com\r\n\r\nthree").unwrap();

    // Newest first.
    assert_eq!(
        spool.list(&list).unwrap(),
        vec![third.clone(), second.clone(), first.clone()]
    );

    assert_eq!(
        spool.read(&list, &first).unwrap(),
        b"From: a@example.com\r\n\r\none"
    );
    assert!(spool.read(&list, "../../../etc/passwd.eml").is_err());
    assert!(spool.read(&list, "no-extension").is_err());
    assert!(spool.delete(&list, "sub/dir.eml").is_err());

    spool.delete(&list, &second).unwrap();
    assert_eq!(spool.list(&list).unwrap(), vec![third.clone(), first.clone()]);

    // The storage key keeps the folder name filesystem safe.
    assert_eq!(list.storage_key(), "mod%40example.com");
}

#[tokio::test]
async fn moderation_queue_paging() {
    let ts = TestServer::new("paging");
    let store = ts.server.store();
    let list = store.create_list(&addr("page@example.com"), "Page").unwrap();

    let mut filenames = Vec::new();
    for i in 0..13 {
        filenames.push(
            ts.server
                .spool()
                .put(&list, format!("From: x@example.com\r\n\r\n{i}").as_bytes())
                .unwrap(),
        );
    }
    filenames.sort_unstable_by(|a, b| b.cmp(a));

    let page1 = ts.server.held_page(&list, 1).unwrap();
    let page2 = ts.server.held_page(&list, 2).unwrap();
    assert_eq!(page1.len(), 10);
    assert_eq!(page2.len(), 3);
    assert_eq!(page1[..], filenames[..10]);
    assert_eq!(page2[..], filenames[10..]);
}
