// Messaging - Lock-free channels between the engine, the audio callback and the front end

pub mod channels;
pub mod command;
pub mod notification;
