use crate::domain::message::{LogPosition, Message};
use std::collections::{BTreeSet, HashMap, HashSet};
use time::OffsetDateTime;
use uuid::Uuid;

/// One row of a viewer's conversation list. Derived from the log, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub partner_id: Uuid,
    pub last_message: String,
    pub last_message_id: Uuid,
    pub last_sender_id: Uuid,
    pub last_message_time: OffsetDateTime,
    pub unread_count: u64,
}

impl ConversationSummary {
    fn from_message(partner_id: Uuid, message: &Message) -> Self {
        Self {
            partner_id,
            last_message: message.content.clone(),
            last_message_id: message.id,
            last_sender_id: message.sender_id,
            last_message_time: message.created_at,
            unread_count: 0,
        }
    }

    fn set_last(&mut self, message: &Message) {
        self.last_message.clone_from(&message.content);
        self.last_message_id = message.id;
        self.last_sender_id = message.sender_id;
        self.last_message_time = message.created_at;
    }
}

/// Builds the conversation list for `viewer_id` from the output of a participant query.
///
/// `messages` must be in log order; the last message seen per partner wins.
#[must_use]
pub fn aggregate(viewer_id: Uuid, messages: &[Message]) -> Vec<ConversationSummary> {
    let mut by_partner: HashMap<Uuid, ConversationSummary> = HashMap::new();

    for message in messages.iter().filter(|m| m.is_visible_to(viewer_id)) {
        let partner_id = message.partner_of(viewer_id);
        let summary = by_partner
            .entry(partner_id)
            .and_modify(|s| s.set_last(message))
            .or_insert_with(|| ConversationSummary::from_message(partner_id, message));

        if message.is_unread_by(viewer_id) {
            summary.unread_count += 1;
        }
    }

    sorted(by_partner.into_values().collect())
}

fn sorted(mut summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
    summaries.sort_by(|a, b| {
        b.last_message_time.cmp(&a.last_message_time).then_with(|| b.last_message_id.cmp(&a.last_message_id))
    });
    summaries
}

/// Incrementally maintained `partner_id -> summary` map for one viewer.
///
/// Unlike [`aggregate`], messages may be applied in any order and more than
/// once: each id is folded at most once, and the summary only moves forward in
/// log order. Unread rows are tracked by position so a read point clears only
/// what it covers.
#[derive(Debug, Clone)]
pub struct ConversationIndex {
    viewer_id: Uuid,
    by_partner: HashMap<Uuid, Thread>,
    read_through: HashMap<Uuid, LogPosition>,
    seen: HashSet<Uuid>,
}

#[derive(Debug, Clone)]
struct Thread {
    summary: ConversationSummary,
    unread: BTreeSet<LogPosition>,
}

impl Thread {
    fn sync_count(&mut self) {
        self.summary.unread_count = self.unread.len() as u64;
    }
}

impl ConversationIndex {
    #[must_use]
    pub fn new(viewer_id: Uuid) -> Self {
        Self { viewer_id, by_partner: HashMap::new(), read_through: HashMap::new(), seen: HashSet::new() }
    }

    /// Seeds an index from a full participant query.
    #[must_use]
    pub fn from_log(viewer_id: Uuid, messages: &[Message]) -> Self {
        let mut index = Self::new(viewer_id);
        for message in messages {
            index.apply(message);
        }
        index
    }

    /// Folds one message into the index. Messages the viewer cannot see, and
    /// ids already folded, are ignored.
    pub fn apply(&mut self, message: &Message) {
        if !message.is_visible_to(self.viewer_id) || !self.seen.insert(message.id) {
            return;
        }

        let partner_id = message.partner_of(self.viewer_id);
        let position = message.order_key();
        let already_read = self.read_through.get(&partner_id).is_some_and(|mark| position <= *mark);

        let thread = self.by_partner.entry(partner_id).or_insert_with(|| Thread {
            summary: ConversationSummary::from_message(partner_id, message),
            unread: BTreeSet::new(),
        });

        if position > (LogPosition { created_at: thread.summary.last_message_time, id: thread.summary.last_message_id })
        {
            thread.summary.set_last(message);
        }
        if message.is_unread_by(self.viewer_id) && !already_read {
            thread.unread.insert(position);
            thread.sync_count();
        }
    }

    /// Applies a read point: every unread message from `partner_id` at or
    /// before `through` is now read. Later messages keep counting.
    pub fn mark_read(&mut self, partner_id: Uuid, through: LogPosition) {
        let mark = self.read_through.entry(partner_id).or_insert(through);
        *mark = (*mark).max(through);
        let mark = *mark;

        if let Some(thread) = self.by_partner.get_mut(&partner_id) {
            thread.unread.retain(|position| *position > mark);
            thread.sync_count();
        }
    }

    #[must_use]
    pub fn get(&self, partner_id: Uuid) -> Option<&ConversationSummary> {
        self.by_partner.get(&partner_id).map(|t| &t.summary)
    }

    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.by_partner.values().map(|t| t.summary.unread_count).sum()
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        sorted(self.by_partner.values().map(|t| t.summary.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn msg(sender: Uuid, recipient: Uuid, content: &str, at: OffsetDateTime, read: bool) -> Message {
        Message {
            id: Uuid::now_v7(),
            sender_id: sender,
            recipient_id: recipient,
            content: content.to_string(),
            subject: None,
            client_message_id: None,
            created_at: at,
            read_at: read.then_some(at),
        }
    }

    #[test]
    fn test_aggregate_scenario_hello_hi() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let t1 = OffsetDateTime::now_utc();
        let log = vec![msg(a, b, "hello", t1, false), msg(b, a, "hi", t1 + Duration::seconds(1), false)];

        let list = aggregate(a, &log);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].partner_id, b);
        assert_eq!(list[0].last_message, "hi");
        assert_eq!(list[0].last_sender_id, b);
        assert_eq!(list[0].unread_count, 1);

        // From B's side only A's "hello" is unread.
        let list_b = aggregate(b, &log);
        assert_eq!(list_b[0].partner_id, a);
        assert_eq!(list_b[0].unread_count, 1);
    }

    #[test]
    fn test_aggregate_orders_by_last_message_time_desc() {
        let (me, p1, p2, p3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let t = OffsetDateTime::now_utc();
        let log = vec![
            msg(p1, me, "old", t, true),
            msg(me, p2, "middle", t + Duration::seconds(1), false),
            msg(p3, me, "newest", t + Duration::seconds(2), false),
            msg(me, p1, "p1 again", t + Duration::seconds(3), false),
        ];

        let partners: Vec<Uuid> = aggregate(me, &log).into_iter().map(|s| s.partner_id).collect();
        assert_eq!(partners, vec![p1, p3, p2]);
    }

    #[test]
    fn test_aggregate_breaks_time_ties_by_higher_id() {
        let (me, p1, p2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let t = OffsetDateTime::now_utc();
        let first = msg(p1, me, "first", t, false);
        let second = msg(p2, me, "second", t, false);
        assert!(first.id < second.id);

        let list = aggregate(me, &[first, second]);
        assert_eq!(list[0].partner_id, p2);
        assert_eq!(list[1].partner_id, p1);
    }

    #[test]
    fn test_unread_sum_matches_unread_rows() {
        let (me, p1, p2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let t = OffsetDateTime::now_utc();
        let log = vec![
            msg(p1, me, "a", t, false),
            msg(p1, me, "b", t + Duration::seconds(1), true),
            msg(p2, me, "c", t + Duration::seconds(2), false),
            msg(me, p2, "d", t + Duration::seconds(3), false),
            msg(p2, me, "e", t + Duration::seconds(4), false),
        ];

        let unread_rows = log.iter().filter(|m| m.is_unread_by(me)).count() as u64;
        let summed: u64 = aggregate(me, &log).iter().map(|s| s.unread_count).sum();
        assert_eq!(summed, unread_rows);
        assert_eq!(summed, 3);
    }

    #[test]
    fn test_aggregate_ignores_foreign_messages() {
        let (me, x, y) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let log = vec![msg(x, y, "not mine", OffsetDateTime::now_utc(), false)];
        assert!(aggregate(me, &log).is_empty());
    }

    #[test]
    fn test_index_converges_with_out_of_order_apply() {
        let (me, p1, p2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let t = OffsetDateTime::now_utc();
        let log = vec![
            msg(p1, me, "one", t, false),
            msg(me, p2, "two", t + Duration::seconds(1), false),
            msg(p1, me, "three", t + Duration::seconds(2), false),
        ];

        let mut index = ConversationIndex::new(me);
        for m in log.iter().rev() {
            index.apply(m);
        }

        assert_eq!(index.summaries(), aggregate(me, &log));
        assert_eq!(index.get(p1).map(|s| s.last_message.as_str()), Some("three"));
        assert_eq!(index.total_unread(), 2);
    }

    #[test]
    fn test_index_mark_read_and_seed_from_log() {
        let (me, p1) = (Uuid::new_v4(), Uuid::new_v4());
        let t = OffsetDateTime::now_utc();
        let log = vec![msg(p1, me, "a", t, false), msg(p1, me, "b", t + Duration::seconds(1), false)];

        let mut index = ConversationIndex::from_log(me, &log);
        assert_eq!(index.total_unread(), 2);

        index.mark_read(p1, log[1].order_key());
        assert_eq!(index.get(p1).map(|s| s.unread_count), Some(0));

        index.apply(&msg(p1, me, "c", t + Duration::seconds(2), false));
        assert_eq!(index.get(p1).map(|s| s.unread_count), Some(1));
        assert_eq!(index.get(p1).map(|s| s.last_message.as_str()), Some("c"));
    }

    #[test]
    fn test_index_ignores_push_of_already_seeded_last_message() {
        let (me, p1) = (Uuid::new_v4(), Uuid::new_v4());
        let latest = msg(p1, me, "racing", OffsetDateTime::now_utc(), false);

        let mut index = ConversationIndex::from_log(me, std::slice::from_ref(&latest));
        index.apply(&latest);

        assert_eq!(index.total_unread(), 1);
    }

    #[test]
    fn test_index_does_not_recount_seeded_messages_on_push() {
        let (me, p1) = (Uuid::new_v4(), Uuid::new_v4());
        let t = OffsetDateTime::now_utc();
        let m1 = msg(p1, me, "first", t, false);
        let m2 = msg(p1, me, "second", t + Duration::seconds(1), false);

        let mut index = ConversationIndex::from_log(me, &[m1.clone(), m2.clone()]);
        index.apply(&m1);
        index.apply(&m2);

        assert_eq!(index.total_unread(), 2);
        assert_eq!(index.summaries(), aggregate(me, &[m1, m2]));
    }

    #[test]
    fn test_index_read_point_keeps_newer_unread() {
        let (me, p1) = (Uuid::new_v4(), Uuid::new_v4());
        let t = OffsetDateTime::now_utc();
        let m1 = msg(p1, me, "read elsewhere", t, false);
        let m2 = msg(p1, me, "arrived after", t + Duration::seconds(1), false);

        let mut index = ConversationIndex::from_log(me, std::slice::from_ref(&m1));
        index.apply(&m2);
        // The read-state event covers only m1 but lands after m2's push.
        index.mark_read(p1, m1.order_key());

        assert_eq!(index.get(p1).map(|s| s.unread_count), Some(1));
        assert_eq!(index.total_unread(), 1);
    }

    #[test]
    fn test_index_read_point_arriving_before_push_discounts_it() {
        let (me, p1) = (Uuid::new_v4(), Uuid::new_v4());
        let m1 = msg(p1, me, "late push", OffsetDateTime::now_utc(), false);

        let mut index = ConversationIndex::new(me);
        index.mark_read(p1, m1.order_key());
        index.apply(&m1);

        assert_eq!(index.get(p1).map(|s| s.last_message.as_str()), Some("late push"));
        assert_eq!(index.total_unread(), 0);
    }

    #[test]
    fn test_index_read_point_never_moves_backwards() {
        let (me, p1) = (Uuid::new_v4(), Uuid::new_v4());
        let t = OffsetDateTime::now_utc();
        let m1 = msg(p1, me, "a", t, false);
        let m2 = msg(p1, me, "b", t + Duration::seconds(1), false);

        let mut index = ConversationIndex::from_log(me, &[m1.clone(), m2.clone()]);
        index.mark_read(p1, m2.order_key());
        index.mark_read(p1, m1.order_key());

        assert_eq!(index.total_unread(), 0);
    }
}
