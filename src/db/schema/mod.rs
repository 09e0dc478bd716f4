mod v0_to_v1;
mod v1_to_v2;
mod v2_to_v3;
mod v3_to_v4;

use super::migration::Migration;

use v0_to_v1::UPGRADE_0_TO_1_SQL;
use v1_to_v2::migrate_1_to_2;
use v2_to_v3::migrate_2_to_3;
use v3_to_v4::migrate_3_to_4;

// Migration constants for each schema version upgrade. Never edit a shipped one:
// databases already past it will not run it again.
pub const MIGRATION_0_TO_1: Migration =
    Migration::sql_only(1, "initial_dashboard_schema", UPGRADE_0_TO_1_SQL);
pub const MIGRATION_1_TO_2: Migration =
    Migration::code_only(2, "widget_grid_layout", migrate_1_to_2);
pub const MIGRATION_2_TO_3: Migration =
    Migration::code_only(3, "widget_display_show_title", migrate_2_to_3);
pub const MIGRATION_3_TO_4: Migration =
    Migration::code_only(4, "integration_polling_settings", migrate_3_to_4);

pub const MIGRATIONS: &[Migration] = &[
    MIGRATION_0_TO_1,
    MIGRATION_1_TO_2,
    MIGRATION_2_TO_3,
    MIGRATION_3_TO_4,
];
