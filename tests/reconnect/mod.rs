mod events;
mod notifications;
