// Sluice Infra Broker - in-process MessageBroker adapter

mod channel_broker;

pub use channel_broker::ChannelBroker;
