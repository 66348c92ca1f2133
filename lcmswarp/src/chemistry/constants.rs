// Purpose: To store constants that are used in the program
pub const MASS_PROTON: f64 = 1.007276466621; // Unified atomic mass unit

// parts-per-million scaling of relative mass errors
pub const PPM: f64 = 1e6;
