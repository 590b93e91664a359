mod helpers;
mod mocks;
mod refunds;
mod webhooks;
