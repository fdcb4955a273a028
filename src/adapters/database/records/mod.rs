mod message;
mod user;

pub(crate) use message::MessageRecord;
pub(crate) use user::UserRecord;
