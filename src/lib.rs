// Domain errors
pub mod error;

// Entity ids, color modes and monitored entities
pub mod entity;

// Current entity states and session metrics
pub mod state;

// Configuration loading and environment overrides
pub mod config;

// Timers for playbooks and throttled groups
pub mod scheduler;

// Templates and conditions evaluated against current states
pub mod template;
pub mod condition;

// Calibration tables for linear interpolation
pub mod calibration;

// Power profiles and sub-profile selection
pub mod profile;

// Lookup tables and the table registry
pub mod lut;

// Power calculation strategies
pub mod strategy;

// Virtual power and energy sensors
pub mod sensor;

// Energy integration
pub mod energy;

// Power and energy groups
pub mod group;

// Previous-state store and persistence
pub mod store;

// Calculation session
pub mod session;
