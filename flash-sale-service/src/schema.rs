diesel::table! {
    orders (id) {
        id -> Int4,
        stock_id -> Int4,
        name -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Int4,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    stock (id) {
        id -> Int4,
        name -> Varchar,
        count -> Int4,
        sale -> Int4,
        version -> Int4,
    }
}

diesel::table! {
    users (id) {
        id -> Int4,
        name -> Varchar,
    }
}

diesel::joinable!(orders -> stock (stock_id));

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    outbox_events,
    stock,
    users,
);
