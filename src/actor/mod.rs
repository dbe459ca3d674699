//! The replica runs as an actor: one task owns all replica state and handles events serially.
//! Everything else (RPC server, timers, the state machine applier) talks to it through a queue.
mod client;
mod event;
mod replica_actor;

pub(crate) use client::ActorClient;
pub(crate) use client::ActorExited;
pub(crate) use client::WeakActorClient;
pub(crate) use event::Callback;
pub(crate) use event::Event;
pub(crate) use replica_actor::ReplicaActor;
