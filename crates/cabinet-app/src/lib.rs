// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod columns;
pub mod forms;
pub mod ids;
pub mod invoice;
pub mod model;
pub mod payload;
pub mod search;
pub mod state;
pub mod table;

pub use columns::*;
pub use forms::*;
pub use ids::*;
pub use invoice::*;
pub use model::*;
pub use payload::*;
pub use search::*;
pub use state::*;
pub use table::*;
