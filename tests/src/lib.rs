#![cfg(test)]

mod fixtures;

mod breaker;
mod context;
mod dispatch;
mod permissions;
mod stores;
mod transform;
mod workflows;
