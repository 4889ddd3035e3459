mod mock;
mod wifi;
