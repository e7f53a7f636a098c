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
use store::{List, ListAction, ListStore};

/// Policy violations carry the exact wording returned to the submitting
/// MTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Non-empty reverse path addressed to the bounce channel.
    NonBounceToBounceAddress,
    /// Empty reverse path addressed to the list itself.
    BounceToNonBounceAddress,
    LoopDetected(String),
    NotInToOrCc(String),
    /// The per-class action said `Reject`; deliberately indistinguishable
    /// from an unknown recipient.
    Rejected,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::NonBounceToBounceAddress => write!(
                f,
                "bounce address accepts only bounce notifications (with empty envelope-from)"
            ),
            PolicyError::BounceToNonBounceAddress => write!(
                f,
                "got bounce notification (with empty envelope-from) to non-bounce address"
            ),
            PolicyError::LoopDetected(list) => write!(f, "email loop detected: {list}"),
            PolicyError::NotInToOrCc(list) => {
                write!(f, "list address {list} is not in To or Cc")
            }
            PolicyError::Rejected => write!(f, "user not found"),
        }
    }
}

impl std::error::Error for PolicyError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderClass {
    Mod,
    Member,
    Known,
    Unknown,
}

/// How the per-recipient pipeline proceeds once policy has spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Distribute,
    Moderate,
    Reject,
}

/// The sender's class relative to a list. A missing or ambiguous `From:`
/// is an unknown sender.
pub fn classify(
    store: &ListStore,
    list: &List,
    sender: Option<&Addr>,
) -> store::Result<SenderClass> {
    let sender = match sender {
        Some(sender) => sender,
        None => return Ok(SenderClass::Unknown),
    };
    if let Some(membership) = store.get_membership(list, sender)? {
        Ok(if membership.moderate {
            SenderClass::Mod
        } else {
            SenderClass::Member
        })
    } else if store.is_known(list, sender)? {
        Ok(SenderClass::Known)
    } else {
        Ok(SenderClass::Unknown)
    }
}

/// Looks up the list's action for a class and turns it into a decision.
pub fn decide(list: &List, class: SenderClass) -> Decision {
    let action = match class {
        SenderClass::Mod => list.action_mod,
        SenderClass::Member => list.action_member,
        SenderClass::Known => list.action_known,
        SenderClass::Unknown => list.action_unknown,
    };
    match action {
        ListAction::Pass => Decision::Distribute,
        ListAction::Mod => Decision::Moderate,
        ListAction::Reject => Decision::Reject,
    }
}
