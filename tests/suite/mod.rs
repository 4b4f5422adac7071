mod approval_flow;
mod config_wiring;
mod openai_flow;
