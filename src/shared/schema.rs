diesel::table! {
    customers (id) {
        id -> Uuid,
        full_name -> Text,
        phone -> Nullable<Text>,
        email -> Nullable<Text>,
        total_repairs -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    profiles (id) {
        id -> Uuid,
        email -> Text,
        password_hash -> Text,
        full_name -> Text,
        role -> Text,
        customer_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        customer_id -> Uuid,
        brand -> Text,
        model -> Text,
        serial_number -> Nullable<Text>,
        description -> Nullable<Text>,
        status -> Text,
        is_backordered -> Bool,
        estimate_status -> Text,
        estimate_total -> Nullable<Numeric>,
        assigned_to -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    estimate_items (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        description -> Text,
        part_cost -> Numeric,
        labor_cost -> Numeric,
        is_approved -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    parts_orders (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        part_name -> Text,
        vendor -> Nullable<Text>,
        cost -> Nullable<Numeric>,
        status -> Text,
        tracking_link -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    audit_logs (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        actor_name -> Text,
        action -> Text,
        details -> Text,
        metadata -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    inventory_items (id) {
        id -> Uuid,
        name -> Text,
        manufacturer -> Nullable<Text>,
        sku -> Nullable<Text>,
        bin_location -> Nullable<Text>,
        quantity -> Int4,
        min_quantity -> Int4,
        price -> Nullable<Numeric>,
        cost -> Nullable<Numeric>,
        supplier -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    shop_settings (id) {
        id -> Uuid,
        tax_rate -> Numeric,
        default_labor_rate -> Numeric,
        shop_name -> Text,
        shop_phone -> Text,
        shop_email -> Text,
        shop_address -> Nullable<Text>,
        quick_replies -> Jsonb,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(tickets -> customers (customer_id));
diesel::joinable!(profiles -> customers (customer_id));
diesel::joinable!(estimate_items -> tickets (ticket_id));
diesel::joinable!(parts_orders -> tickets (ticket_id));
diesel::joinable!(audit_logs -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(
    customers,
    profiles,
    tickets,
    estimate_items,
    parts_orders,
    audit_logs,
    inventory_items,
    shop_settings,
);
